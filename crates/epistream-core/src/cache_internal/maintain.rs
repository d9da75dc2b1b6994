//! Eviction and cleanup of abandoned builder files.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

use super::keys;

pub(crate) fn evict_impl(artifact: &Path) -> PipelineResult<bool> {
    match fs::remove_file(artifact) {
        Ok(()) => {
            debug!(path = %artifact.display(), "evicted cache artifact");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::cache(format!(
            "failed to evict cache artifact: {}",
            e
        ))),
    }
}

/// Remove temp files left behind by builders that died before cleanup.
pub(crate) fn sweep_temp_files_impl(cache_dir: &Path) -> PipelineResult<usize> {
    let entries = match fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(PipelineError::cache(format!(
                "failed to read cache directory: {}",
                e
            )))
        }
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| {
            PipelineError::cache(format!("failed to read directory entry: {}", e))
        })?;
        let path = entry.path();
        if keys::is_temp_file_impl(&path) && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(removed, dir = %cache_dir.display(), "swept abandoned cache temp files");
    }
    Ok(removed)
}
