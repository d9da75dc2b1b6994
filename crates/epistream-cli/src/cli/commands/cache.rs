use epistream_core::{FrameCache, PipelineError};
use serde_json::json;

use super::common::{load_config, print_json};
use crate::cli::args::{CacheArgs, CacheSub, GlobalArgs};
use crate::exit_codes::SUCCESS;

pub fn run(global: &GlobalArgs, args: CacheArgs) -> anyhow::Result<i32> {
    let config = load_config(global)?;
    let cache = FrameCache::new(&config);

    match args.cmd {
        CacheSub::Status { run_id } => {
            let artifact = cache.open(run_id).ok_or_else(|| PipelineError::NotFound {
                what: format!("frame cache for run {}", run_id),
            })?;
            print_json(&json!({
                "run_id": run_id,
                "path": artifact.path.display().to_string(),
                "bytes": artifact.size,
                "etag": artifact.etag(),
            }))?;
        }
        CacheSub::Evict { run_id } => {
            let evicted = cache.evict(run_id)?;
            print_json(&json!({ "run_id": run_id, "evicted": evicted }))?;
        }
        CacheSub::Sweep => {
            let removed = cache.sweep_temp_files()?;
            print_json(&json!({ "removed": removed }))?;
        }
    }
    Ok(SUCCESS)
}
