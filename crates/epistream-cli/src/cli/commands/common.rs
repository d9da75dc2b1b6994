//! Helpers shared by commands: config resolution, run loading, output.

use std::path::Path;

use anyhow::Context;
use epistream_core::decode::Compression;
use epistream_core::{BuildSummary, CancelToken, PapData, PipelineConfig, RunInputs, TimeRange};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::cli::args::{GlobalArgs, RunArgs};

/// `--config` file if given, else environment; flags override both.
pub(crate) fn load_config(global: &GlobalArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &global.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::from_env(),
    };
    if let Some(dir) = &global.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(db) = &global.db {
        config = config.with_db_path(db);
    }
    config.validate()?;
    Ok(config)
}

pub(crate) fn load_papdata(path: &Path) -> anyhow::Result<PapData> {
    PapData::load(path, Compression::Auto)
        .with_context(|| format!("failed to load papdata {}", path.display()))
}

pub(crate) fn load_run(args: &RunArgs) -> anyhow::Result<(PapData, RunInputs)> {
    let papdata = load_papdata(&args.papdata)?;
    let inputs = papdata.run_inputs(args.run_id, &args.simdata, &args.patterns, args.length);
    Ok((papdata, inputs))
}

pub(crate) fn range(from: Option<u64>, to: Option<u64>) -> TimeRange {
    TimeRange::new(from, to)
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel `token` when the process receives Ctrl-C.
pub(crate) fn watch_ctrl_c(token: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });
}

pub(crate) fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    watch_ctrl_c(token.clone());
    token
}

pub(crate) fn build_summary_json(summary: &BuildSummary) -> Value {
    json!({
        "run_id": summary.run_id,
        "frames": summary.frames,
        "frames_sent": summary.frames_sent,
        "hotspots": summary.hotspots,
        "skipped": {
            "infection": summary.join.skipped_infection,
            "movement": summary.join.skipped_movement,
        },
        "published": summary.published.as_ref().map(|p| json!({
            "path": p.path.display().to_string(),
            "bytes": p.bytes,
        })),
    })
}
