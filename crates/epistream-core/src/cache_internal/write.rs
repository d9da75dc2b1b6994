//! Incremental artifact builder.
//!
//! Entries stream into a temp file next to the artifact. `finish` writes the
//! hotspot trailer, syncs, and renames over the artifact path; the rename is
//! the only publication point. A writer dropped before `finish` removes its
//! temp file, so the artifact path never holds a partial build.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::model::HotspotMap;

use super::{format, keys};

/// Result of a published build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: u64,
}

/// Streaming builder for one artifact.
#[derive(Debug)]
pub struct CacheWriter {
    temp_path: PathBuf,
    artifact_path: PathBuf,
    out: Option<BufWriter<File>>,
    frames: u64,
    bytes: u64,
}

impl CacheWriter {
    pub(crate) fn create_impl(artifact_path: &Path) -> PipelineResult<Self> {
        if let Some(parent) = artifact_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::cache(format!("failed to create cache directory: {}", e))
            })?;
        }

        let temp_path = keys::temp_path_impl(artifact_path);
        let file = File::create(&temp_path)
            .map_err(|e| PipelineError::cache(format!("failed to create temp file: {}", e)))?;

        let mut writer = Self {
            temp_path,
            artifact_path: artifact_path.to_path_buf(),
            out: Some(BufWriter::new(file)),
            frames: 0,
            bytes: 0,
        };
        writer.write(format::SIMDATA_PREFIX)?;
        debug!(temp = %writer.temp_path.display(), "cache build started");
        Ok(writer)
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn write(&mut self, bytes: &[u8]) -> PipelineResult<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| PipelineError::cache("cache writer already closed"))?;
        out.write_all(bytes)
            .map_err(|e| PipelineError::cache(format!("failed to write temp file: {}", e)))?;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    /// Append one pre-encoded `"<timestep>":<frame>` entry.
    pub fn append_entry(&mut self, entry: &[u8]) -> PipelineResult<()> {
        if self.frames > 0 {
            self.write(b",")?;
        }
        self.write(entry)?;
        self.frames += 1;
        Ok(())
    }

    /// Write the trailer and atomically publish the artifact.
    pub fn finish(mut self, hotspots: &HotspotMap) -> PipelineResult<PublishedArtifact> {
        let mut trailer = Vec::new();
        format::write_trailer(&mut trailer, hotspots)?;
        self.write(&trailer)?;

        let out = self
            .out
            .take()
            .ok_or_else(|| PipelineError::cache("cache writer already closed"))?;
        let file = out
            .into_inner()
            .map_err(|e| PipelineError::cache(format!("failed to flush temp file: {}", e)))?;
        file.sync_all()
            .map_err(|e| PipelineError::cache(format!("failed to sync temp file: {}", e)))?;
        drop(file);

        fs::rename(&self.temp_path, &self.artifact_path)
            .map_err(|e| PipelineError::cache(format!("failed to rename temp file: {}", e)))?;

        debug!(
            path = %self.artifact_path.display(),
            frames = self.frames,
            bytes = self.bytes,
            "cache artifact published"
        );

        let published = PublishedArtifact {
            path: self.artifact_path.clone(),
            frames: self.frames,
            bytes: self.bytes,
        };
        // Renamed away; nothing left for Drop to remove.
        self.temp_path = PathBuf::new();
        Ok(published)
    }

    /// Discard the build. Equivalent to dropping the writer.
    pub fn abort(self) {}
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if self.temp_path.as_os_str().is_empty() {
            return;
        }
        drop(self.out.take());
        match fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(temp = %self.temp_path.display(), "cache build discarded"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                temp = %self.temp_path.display(),
                error = %e,
                "failed to remove abandoned cache temp file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::format::encode_entry;
    use crate::model::CompactFrame;
    use tempfile::TempDir;

    fn entry(ts: u64) -> Vec<u8> {
        encode_entry(
            ts,
            &CompactFrame {
                h: vec![1, 0],
                p: vec![],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_finish_publishes_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("1.frames");

        let mut writer = CacheWriter::create_impl(&artifact).unwrap();
        writer.append_entry(&entry(60)).unwrap();
        writer.append_entry(&entry(120)).unwrap();
        let mut hotspots = HotspotMap::new();
        hotspots.insert("p".into(), vec![120]);
        let published = writer.finish(&hotspots).unwrap();

        assert_eq!(published.frames, 2);
        let bytes = fs::read(&artifact).unwrap();
        assert_eq!(published.bytes, bytes.len() as u64);
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#","simdata":{"60":{"h":[1,0],"p":[]},"120":{"h":[1,0],"p":[]}},"hotspots":{"p":[120]}"#
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_drop_discards_temp_and_keeps_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("1.frames");
        fs::write(&artifact, b"previous").unwrap();

        let mut writer = CacheWriter::create_impl(&artifact).unwrap();
        writer.append_entry(&entry(60)).unwrap();
        let temp = writer.temp_path().to_path_buf();
        assert!(temp.exists());
        drop(writer);

        assert!(!temp.exists());
        assert_eq!(fs::read(&artifact).unwrap(), b"previous");
    }

    #[test]
    fn test_empty_build_is_valid_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("nested").join("2.frames");
        let writer = CacheWriter::create_impl(&artifact).unwrap();
        writer.finish(&HotspotMap::new()).unwrap();
        assert_eq!(
            fs::read(&artifact).unwrap(),
            br#","simdata":{},"hotspots":{}"#
        );
    }
}
