use std::sync::Arc;

use anyhow::Context;
use epistream_core::{PipelineError, RunService};
use serde_json::json;

use super::common::{cancel_on_ctrl_c, load_config, load_papdata, load_run, print_json, range};
use crate::cli::args::{GlobalArgs, LocationQueryArgs, LocationsArgs, LocationsSub};
use crate::exit_codes::SUCCESS;

pub async fn run(global: &GlobalArgs, args: LocationsArgs) -> anyhow::Result<i32> {
    let config = load_config(global)?;
    let service = RunService::open(config).context("failed to open stats store")?;

    match args.cmd {
        LocationsSub::Ingest(run) => {
            let (_, inputs) = load_run(&run)?;
            let summary = service
                .ingest_locations(&inputs, cancel_on_ctrl_c())
                .await
                .with_context(|| format!("failed to ingest locations for run {}", run.run_id))?;
            print_json(&json!({
                "run_id": run.run_id,
                "timesteps": summary.timesteps,
                "rows": summary.rows,
                "inserted": summary.inserted,
                "batches": summary.batches,
            }))?;
        }
        LocationsSub::List { run_id } => {
            let ids = service.store().location_ids(run_id)?;
            print_json(&ids)?;
        }
        LocationsSub::Query(query) => query_location(&service, query).await?,
    }
    Ok(SUCCESS)
}

async fn query_location(service: &RunService, query: LocationQueryArgs) -> anyhow::Result<()> {
    let range = range(query.from, query.to);

    if query.chart {
        let papdata_path = query
            .papdata
            .as_deref()
            .context("--chart needs --papdata")?;
        let snapshot = Arc::new(load_papdata(papdata_path)?.snapshot());
        let dataset = service
            .location_chart(query.run_id, &query.location, range, snapshot)
            .await?;
        if dataset.is_empty() {
            return Err(not_found(&query).into());
        }
        return print_json(&dataset);
    }

    let rows = service
        .store()
        .location_rows(query.run_id, &query.location, &range)?;
    if rows.is_empty() {
        return Err(not_found(&query).into());
    }
    let rows: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "timestep": row.timestep,
                "population": row.population,
                "infected": row.infected,
                "breakdown": row.breakdown,
            })
        })
        .collect();
    print_json(&rows)
}

fn not_found(query: &LocationQueryArgs) -> PipelineError {
    PipelineError::NotFound {
        what: format!("location {} in run {}", query.location, query.run_id),
    }
}
