//! Cache read paths: validators, byte-level splice, range re-encode.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::model::TimeRange;

use super::format;

/// An artifact opened for serving, with the metadata its validator derives from.
#[derive(Debug)]
pub struct OpenArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    file: File,
}

impl OpenArtifact {
    /// Weak validator for the full document.
    pub fn etag(&self) -> String {
        etag_impl(self.size, self.modified, None)
    }

    /// Validator for a response covering `range`.
    pub fn etag_for(&self, range: &TimeRange) -> String {
        if range.is_unbounded() {
            self.etag()
        } else {
            etag_impl(self.size, self.modified, Some(range))
        }
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

pub(crate) fn etag_impl(size: u64, modified: SystemTime, range: Option<&TimeRange>) -> String {
    let mtime_ms = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    match range {
        None => format!("W/\"{:x}-{:x}\"", size, mtime_ms),
        Some(r) => format!(
            "W/\"{:x}-{:x}-{}-{}\"",
            size,
            mtime_ms,
            r.from.map(|t| t.to_string()).unwrap_or_default(),
            r.to.map(|t| t.to_string()).unwrap_or_default()
        ),
    }
}

/// Open the artifact if present and readable. Any failure is a miss.
pub(crate) fn open_impl(path: &Path) -> Option<OpenArtifact> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "cache artifact unreadable");
            }
            return None;
        }
    };
    let meta = file.metadata().ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(OpenArtifact {
        path: path.to_path_buf(),
        size: meta.len(),
        modified: meta.modified().unwrap_or(UNIX_EPOCH),
        file,
    })
}

/// `header + artifact bytes + footer`, copied without parsing.
pub(crate) fn splice_impl<W: Write>(
    artifact: OpenArtifact,
    header: &[u8],
    footer: &[u8],
    out: &mut W,
) -> io::Result<u64> {
    out.write_all(header)?;
    let mut reader = BufReader::new(artifact.into_file());
    let copied = io::copy(&mut reader, out)?;
    out.write_all(footer)?;
    Ok(header.len() as u64 + copied + footer.len() as u64)
}

/// Decode the whole artifact and re-encode only the timesteps in `range`.
pub(crate) fn read_range_impl(artifact: OpenArtifact, range: &TimeRange) -> PipelineResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(artifact.size as usize);
    artifact
        .into_file()
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::cache(format!("failed to read artifact: {}", e)))?;
    let doc = format::decode_document(&bytes)?;
    format::encode_range(&doc, range)
}
