//! Frame cache artifacts.
//!
//! One artifact per run holds the variable middle of the frames document
//! (`,"simdata":{..},"hotspots":{..}`). It is built once, published by
//! atomic rename, and read concurrently by any number of requests.
//!
//! # Cache Structure
//!
//! ```text
//! <cache_dir>/
//!   <run_id>.frames                 # published artifact
//!   .<run_id>.frames.<token>.tmp    # in-flight build (one per builder)
//! ```
//!
//! Two builders racing on the same run each write their own temp file; the
//! last successful rename wins and both artifacts are complete.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::model::TimeRange;

#[path = "cache_internal/mod.rs"]
mod cache_internal;

pub use cache_internal::read::OpenArtifact;
pub use cache_internal::write::{CacheWriter, PublishedArtifact};

pub(crate) use cache_internal::format::{encode_entry, filter_hotspots, write_trailer, SIMDATA_PREFIX};

/// Directory of per-run frame artifacts.
#[derive(Debug, Clone)]
pub struct FrameCache {
    cache_dir: PathBuf,
}

impl FrameCache {
    /// Create a cache rooted at the configured directory.
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_dir(&config.cache_dir)
    }

    /// Create a cache with a custom directory.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Canonical artifact path for a run.
    pub fn artifact_path(&self, run_id: i64) -> PathBuf {
        cache_internal::keys::artifact_path_impl(&self.cache_dir, run_id)
    }

    /// Open the published artifact, or `None` on a miss.
    pub fn open(&self, run_id: i64) -> Option<OpenArtifact> {
        cache_internal::read::open_impl(&self.artifact_path(run_id))
    }

    /// Full-document validator, if the artifact exists.
    pub fn etag(&self, run_id: i64) -> Option<String> {
        self.open(run_id).map(|a| a.etag())
    }

    pub fn exists(&self, run_id: i64) -> bool {
        self.open(run_id).is_some()
    }

    /// Start a new build for a run.
    pub fn begin_build(&self, run_id: i64) -> PipelineResult<CacheWriter> {
        CacheWriter::create_impl(&self.artifact_path(run_id))
    }

    /// Write `header + artifact + footer` to `out` without parsing the artifact.
    pub fn splice<W: Write>(
        artifact: OpenArtifact,
        header: &[u8],
        footer: &[u8],
        out: &mut W,
    ) -> io::Result<u64> {
        cache_internal::read::splice_impl(artifact, header, footer, out)
    }

    /// Artifact-format bytes restricted to `range` (requires a full decode).
    pub fn read_range(artifact: OpenArtifact, range: &TimeRange) -> PipelineResult<Vec<u8>> {
        cache_internal::read::read_range_impl(artifact, range)
    }

    /// Remove a run's artifact. Returns whether one existed.
    pub fn evict(&self, run_id: i64) -> PipelineResult<bool> {
        cache_internal::maintain::evict_impl(&self.artifact_path(run_id))
    }

    /// Remove temp files abandoned by killed builders.
    pub fn sweep_temp_files(&self) -> PipelineResult<usize> {
        cache_internal::maintain::sweep_temp_files_impl(&self.cache_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompactFrame, HotspotMap};
    use tempfile::TempDir;

    fn create_test_cache() -> (FrameCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = FrameCache::with_dir(temp_dir.path().join("frames"));
        (cache, temp_dir)
    }

    #[test]
    fn test_cache_roundtrip() {
        let (cache, _temp_dir) = create_test_cache();
        assert!(!cache.exists(5));

        let mut writer = cache.begin_build(5).unwrap();
        let frame = CompactFrame {
            h: vec![3, 1],
            p: vec![2, 0],
        };
        writer.append_entry(&encode_entry(60, &frame).unwrap()).unwrap();
        writer.finish(&HotspotMap::new()).unwrap();

        let artifact = cache.open(5).unwrap();
        assert!(artifact.etag().starts_with("W/\""));
        let mut out = Vec::new();
        FrameCache::splice(artifact, b"{\"x\":1", b"}", &mut out).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["simdata"]["60"]["h"], serde_json::json!([3, 1]));
    }

    #[test]
    fn test_etag_changes_after_rebuild() {
        let (cache, _temp_dir) = create_test_cache();
        cache.begin_build(1).unwrap().finish(&HotspotMap::new()).unwrap();
        let before = cache.etag(1).unwrap();

        let mut writer = cache.begin_build(1).unwrap();
        writer
            .append_entry(&encode_entry(60, &CompactFrame::default()).unwrap())
            .unwrap();
        writer.finish(&HotspotMap::new()).unwrap();

        assert_ne!(cache.etag(1).unwrap(), before);
    }

    #[test]
    fn test_evict() {
        let (cache, _temp_dir) = create_test_cache();
        cache.begin_build(2).unwrap().finish(&HotspotMap::new()).unwrap();
        assert!(cache.evict(2).unwrap());
        assert!(!cache.exists(2));
        assert!(!cache.evict(2).unwrap());
    }
}
