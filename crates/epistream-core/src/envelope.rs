//! Static header and footer around the cached middle of a frames document.

use serde::Serialize;
use serde_json::Value;

use crate::error::PipelineResult;

/// Bytes placed before and after the artifact.
///
/// The header must end inside an open object, right after a complete
/// member, because the artifact starts with `,"simdata":`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    header: String,
    footer: String,
}

#[derive(Serialize)]
struct RunHeader<'a> {
    name: &'a str,
    length: u64,
    zone: &'a Value,
    papdata: &'a Value,
}

impl ResponseEnvelope {
    pub fn new(header: impl Into<String>, footer: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            footer: footer.into(),
        }
    }

    /// `{"data":{"name":..,"length":..,"zone":..,"papdata":..` and `}}`.
    pub fn for_run(name: &str, length: u64, zone: &Value, papdata: &Value) -> PipelineResult<Self> {
        let mut header = String::from("{\"data\":");
        let members = serde_json::to_string(&RunHeader {
            name,
            length,
            zone,
            papdata,
        })?;
        // Drop the closing brace so the artifact continues the object.
        header.push_str(&members[..members.len() - 1]);
        Ok(Self::new(header, "}}"))
    }

    pub fn header(&self) -> &[u8] {
        self.header.as_bytes()
    }

    pub fn footer(&self) -> &[u8] {
        self.footer.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_for_run_wraps_artifact_into_valid_document() {
        let envelope = ResponseEnvelope::for_run(
            "baseline \"A\"",
            2880,
            &json!({"label": "Tompkins"}),
            &json!({"homes": [], "places": []}),
        )
        .unwrap();

        let mut doc = envelope.header().to_vec();
        doc.extend_from_slice(br#","simdata":{},"hotspots":{}"#);
        doc.extend_from_slice(envelope.footer());

        let value: Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(value["data"]["name"], "baseline \"A\"");
        assert_eq!(value["data"]["length"], 2880);
        assert_eq!(value["data"]["zone"]["label"], "Tompkins");
        assert_eq!(value["data"]["hotspots"], json!({}));
    }
}
