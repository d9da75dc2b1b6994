//! Cache path derivation.

use std::path::{Path, PathBuf};

pub(crate) const ARTIFACT_EXTENSION: &str = "frames";
pub(crate) const TEMP_EXTENSION: &str = "tmp";

pub(crate) fn artifact_path_impl(cache_dir: &Path, run_id: i64) -> PathBuf {
    cache_dir.join(format!("{}.{}", run_id, ARTIFACT_EXTENSION))
}

/// Unique per build attempt so concurrent builders never share a temp file.
pub(crate) fn temp_path_impl(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let token = uuid::Uuid::new_v4().simple();
    artifact.with_file_name(format!(".{}.{}.{}", name, token, TEMP_EXTENSION))
}

pub(crate) fn is_temp_file_impl(path: &Path) -> bool {
    let is_hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    is_hidden && path.extension().is_some_and(|ext| ext == TEMP_EXTENSION)
}
