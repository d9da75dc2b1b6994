//! Aggregate statistics over a run.
//!
//! Two passes share the decoder and join machinery of the frame pipeline:
//!
//! - **Chart pass**: infection stream only, against the static population
//!   snapshot. Produces the `iot`/`ages`/`sexes`/`states` series.
//! - **Location pass**: merge-join of both streams, producing one
//!   [`LocationStatRow`] per occupied location and timestep, bulk-inserted
//!   into the [`StatsStore`](crate::store::StatsStore).

use std::path::Path;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::decode::{Compression, InfectionStream};
use crate::error::PipelineResult;
use crate::join::parse_timestep;
use crate::model::{InfectionRecord, RunInputs, TimeRange};
use crate::papdata::PopulationSnapshot;
use crate::store::StatsStore;
use crate::stream::open_frame_join;

#[path = "stats_internal/mod.rs"]
mod stats_internal;

pub use stats_internal::chart::{ChartAccumulator, ChartDataset, ChartDocument, TimePoint};
pub use stats_internal::demographics::{
    age_bracket, Demographic, DemographicIndex, AGE_BRACKETS, SEX_LABELS,
};
pub use stats_internal::location::{
    decode_breakdown, encode_breakdown, location_rows, Breakdown, LocationKind, LocationStatRow,
};

/// Run the chart pass over a simdata file.
pub fn generate_chart(
    simdata: &Path,
    snapshot: &PopulationSnapshot,
    cancel: &CancelToken,
) -> PipelineResult<ChartDataset> {
    let stream = InfectionStream::open(simdata, Compression::Auto)?;
    let chart = accumulate_chart(stream, DemographicIndex::new(snapshot), cancel)?;
    debug!(path = %simdata.display(), timesteps = chart.len(), "chart pass complete");
    Ok(chart)
}

/// Chart pass over any keyed infection stream.
pub fn accumulate_chart<S>(
    stream: S,
    index: DemographicIndex,
    cancel: &CancelToken,
) -> PipelineResult<ChartDataset>
where
    S: Iterator<Item = PipelineResult<(String, InfectionRecord)>>,
{
    let mut acc = ChartAccumulator::new(index);
    for item in stream {
        cancel.check()?;
        let (key, record) = item?;
        acc.observe(parse_timestep(&key)?, &record)?;
    }
    Ok(acc.finish())
}

/// Chart series for one stored location, scoped to its own population.
pub fn location_chart(
    store: &StatsStore,
    run_id: i64,
    location_id: &str,
    range: &TimeRange,
    snapshot: &PopulationSnapshot,
) -> PipelineResult<ChartDataset> {
    let rows = store.location_rows(run_id, location_id, range)?;
    let mut acc = ChartAccumulator::new(DemographicIndex::new(snapshot));
    for row in &rows {
        acc.observe_scoped(row.timestep, &row.to_infection_record(), u64::from(row.population))?;
    }
    Ok(acc.finish())
}

/// Counters for one location pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub timesteps: u64,
    pub rows: u64,
    pub inserted: u64,
    pub batches: u64,
}

/// Merge-join both streams and store per-location rows in batches.
///
/// Inserts are idempotent per `(run, location, timestep)`, so re-running
/// after a crash fills in only the missing rows.
pub fn ingest_locations(
    inputs: &RunInputs,
    store: &StatsStore,
    batch_size: usize,
    cancel: CancelToken,
) -> PipelineResult<IngestSummary> {
    let batch_size = batch_size.max(1);
    let mut summary = IngestSummary::default();
    let mut batch = Vec::with_capacity(batch_size);

    for aligned in open_frame_join(inputs, cancel)? {
        let aligned = aligned?;
        summary.timesteps += 1;
        for row in location_rows(inputs.run_id, &aligned) {
            batch.push(row);
            if batch.len() >= batch_size {
                summary.inserted += store.insert_location_rows(&batch)? as u64;
                summary.rows += batch.len() as u64;
                summary.batches += 1;
                batch.clear();
            }
        }
    }
    if !batch.is_empty() {
        summary.inserted += store.insert_location_rows(&batch)? as u64;
        summary.rows += batch.len() as u64;
        summary.batches += 1;
    }

    info!(
        run_id = inputs.run_id,
        timesteps = summary.timesteps,
        rows = summary.rows,
        inserted = summary.inserted,
        "location stats ingested"
    );
    Ok(summary)
}
