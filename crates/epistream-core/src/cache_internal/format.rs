//! On-disk artifact format.
//!
//! ```text
//! ,"simdata":{"60":{"h":[..],"p":[..]},"120":{..}},"hotspots":{"pl1":[180]}
//! ```
//!
//! The artifact is the middle of the response document: a caller-provided
//! header ending in a member goes before it and a closing fragment after.
//! No whitespace, no trailing newline.

use std::collections::BTreeMap;
use std::io::Write;

use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};
use crate::model::{CompactFrame, HotspotMap, TimeRange, Timestep};

pub(crate) const SIMDATA_PREFIX: &[u8] = b",\"simdata\":{";
pub(crate) const HOTSPOTS_INFIX: &[u8] = b"},\"hotspots\":";

/// `"<timestep>":<frame>`
pub(crate) fn encode_entry(timestep: Timestep, frame: &CompactFrame) -> PipelineResult<Vec<u8>> {
    let mut out = Vec::with_capacity(16 + (frame.h.len() + frame.p.len()) * 3);
    write!(out, "\"{}\":", timestep)?;
    serde_json::to_writer(&mut out, frame)?;
    Ok(out)
}

/// `},"hotspots":{...}` closing the simdata object.
pub(crate) fn write_trailer<W: Write>(out: &mut W, hotspots: &HotspotMap) -> PipelineResult<()> {
    out.write_all(HOTSPOTS_INFIX)?;
    serde_json::to_writer(&mut *out, hotspots)?;
    Ok(())
}

/// Hotspot timesteps inside `range`; places left empty are dropped.
pub(crate) fn filter_hotspots(hotspots: &HotspotMap, range: &TimeRange) -> HotspotMap {
    if range.is_unbounded() {
        return hotspots.clone();
    }
    hotspots
        .iter()
        .filter_map(|(place, steps)| {
            let kept: Vec<_> = steps.iter().copied().filter(|t| range.contains(*t)).collect();
            (!kept.is_empty()).then(|| (place.clone(), kept))
        })
        .collect()
}

/// Fully decoded artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct CacheDocument {
    pub(crate) simdata: BTreeMap<Timestep, CompactFrame>,
    #[serde(default)]
    pub(crate) hotspots: HotspotMap,
}

pub(crate) fn decode_document(bytes: &[u8]) -> PipelineResult<CacheDocument> {
    if !bytes.starts_with(SIMDATA_PREFIX) {
        return Err(PipelineError::cache(
            "artifact does not start with the simdata member",
        ));
    }
    let mut wrapped = Vec::with_capacity(bytes.len() + 1);
    wrapped.push(b'{');
    wrapped.extend_from_slice(&bytes[1..]);
    wrapped.push(b'}');
    serde_json::from_slice(&wrapped)
        .map_err(|e| PipelineError::cache(format!("corrupt artifact: {}", e)))
}

/// Re-encode the part of a document inside `range`, in artifact format.
pub(crate) fn encode_range(doc: &CacheDocument, range: &TimeRange) -> PipelineResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(SIMDATA_PREFIX);
    let mut first = true;
    for (ts, frame) in doc.simdata.iter().filter(|(ts, _)| range.contains(**ts)) {
        if !first {
            out.push(b',');
        }
        out.extend_from_slice(&encode_entry(*ts, frame)?);
        first = false;
    }
    write_trailer(&mut out, &filter_hotspots(&doc.hotspots, range))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(h: &[u32], p: &[u32]) -> CompactFrame {
        CompactFrame {
            h: h.to_vec(),
            p: p.to_vec(),
        }
    }

    fn sample() -> CacheDocument {
        let mut doc = CacheDocument::default();
        doc.simdata.insert(60, frame(&[1, 0], &[4, 0]));
        doc.simdata.insert(120, frame(&[1, 1], &[4, 2]));
        doc.simdata.insert(180, frame(&[1, 1], &[4, 4]));
        doc.hotspots.insert("pl1".into(), vec![180]);
        doc
    }

    #[test]
    fn test_entry_bytes_are_exact() {
        let bytes = encode_entry(60, &frame(&[2, 1], &[])).unwrap();
        assert_eq!(bytes, br#""60":{"h":[2,1],"p":[]}"#);
    }

    #[test]
    fn test_full_range_round_trips_bytes() {
        let doc = sample();
        let bytes = encode_range(&doc, &TimeRange::default()).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#","simdata":{"60":{"h":[1,0],"p":[4,0]},"120":{"h":[1,1],"p":[4,2]},"180":{"h":[1,1],"p":[4,4]}},"hotspots":{"pl1":[180]}"#
        );
        assert_eq!(decode_document(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_single_timestep_range() {
        let bytes = encode_range(&sample(), &TimeRange::new(Some(120), Some(120))).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#","simdata":{"120":{"h":[1,1],"p":[4,2]}},"hotspots":{}"#
        );
    }

    #[test]
    fn test_decode_rejects_foreign_bytes() {
        assert!(decode_document(b"{\"simdata\":{}}").is_err());
        assert!(decode_document(b",\"simdata\":{\"60\":").is_err());
    }
}
