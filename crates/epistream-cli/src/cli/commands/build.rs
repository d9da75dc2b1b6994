use anyhow::Context;
use epistream_core::FrameService;

use super::common::{build_summary_json, cancel_on_ctrl_c, load_config, load_run, print_json};
use crate::cli::args::{GlobalArgs, RunArgs};
use crate::exit_codes::SUCCESS;

pub async fn run(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<i32> {
    let config = load_config(global)?;
    let (_, inputs) = load_run(&args)?;
    let service = FrameService::new(config);

    let summary = service
        .build(&inputs, cancel_on_ctrl_c())
        .await
        .with_context(|| format!("failed to build frame cache for run {}", inputs.run_id))?;
    print_json(&build_summary_json(&summary))?;
    Ok(SUCCESS)
}
