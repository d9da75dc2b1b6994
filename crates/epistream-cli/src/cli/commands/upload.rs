use anyhow::Context;
use epistream_core::{PipelineError, PipelineResult, RunService, UploadReport};
use serde_json::{json, Value};

use super::common::{build_summary_json, load_config, load_run, print_json, watch_ctrl_c};
use crate::cli::args::{GlobalArgs, RunArgs};
use crate::exit_codes::{CANCELLED, SUCCESS};

/// Run the upload hook in the foreground and report each task.
pub async fn run(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<i32> {
    let config = load_config(global)?;
    let (papdata, inputs) = load_run(&args)?;
    let service = RunService::open(config).context("failed to open stats store")?;

    let handle = service.on_upload(inputs, papdata.snapshot());
    watch_ctrl_c(handle.cancel_token());
    let report = handle.wait().await;

    print_json(&report_json(&report))?;
    Ok(exit_code(&report))
}

fn report_json(report: &UploadReport) -> Value {
    json!({
        "run_id": report.run_id,
        "frames": task_json(&report.frames, build_summary_json),
        "chart": task_json(&report.chart, |doc| json!({ "timesteps": doc.data.len() })),
        "locations": task_json(&report.locations, |s| json!({
            "timesteps": s.timesteps,
            "rows": s.rows,
            "inserted": s.inserted,
        })),
    })
}

fn task_json<T>(result: &PipelineResult<T>, ok: impl Fn(&T) -> Value) -> Value {
    match result {
        Ok(value) => json!({ "ok": ok(value) }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

fn exit_code(report: &UploadReport) -> i32 {
    let errors: Vec<&PipelineError> = [
        report.frames.as_ref().err(),
        report.chart.as_ref().err(),
        report.locations.as_ref().err(),
    ]
    .into_iter()
    .flatten()
    .collect();

    if errors.is_empty() {
        SUCCESS
    } else if errors.iter().any(|e| e.is_cancellation()) {
        CANCELLED
    } else {
        errors[0].exit_code()
    }
}
