use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use epistream_core::RunService;

use super::common::{cancel_on_ctrl_c, load_config, load_papdata, print_json};
use crate::cli::args::{ChartArgs, GlobalArgs};
use crate::exit_codes::SUCCESS;

pub async fn run(global: &GlobalArgs, args: ChartArgs) -> anyhow::Result<i32> {
    let config = load_config(global)?;
    let papdata = load_papdata(&args.papdata)?;
    let service = RunService::open(config).context("failed to open stats store")?;

    // The chart pass reads only the infection stream.
    let inputs = papdata.run_inputs(args.run_id, &args.simdata, PathBuf::new(), 0);
    let snapshot = Arc::new(papdata.snapshot());

    let document = if args.regenerate {
        service
            .regenerate_chart(&inputs, snapshot, cancel_on_ctrl_c())
            .await?
    } else {
        service.chart(&inputs, snapshot).await?
    };
    print_json(&document)?;
    Ok(SUCCESS)
}
