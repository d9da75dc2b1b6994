//! Run-level entry points: frames, charts, location statistics, upload hook.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{RunInputs, TimeRange};
use crate::papdata::PopulationSnapshot;
use crate::stats::{self, ChartDataset, ChartDocument, IngestSummary};
use crate::store::StatsStore;
use crate::stream::{BuildSummary, FrameService};

/// Frame cache plus statistics store for all runs.
#[derive(Debug, Clone)]
pub struct RunService {
    frames: FrameService,
    store: StatsStore,
    config: PipelineConfig,
}

impl RunService {
    pub fn new(config: PipelineConfig, store: StatsStore) -> Self {
        Self {
            frames: FrameService::new(config.clone()),
            store,
            config,
        }
    }

    /// Open the store at `config.db_path`.
    pub fn open(config: PipelineConfig) -> PipelineResult<Self> {
        let store = StatsStore::open(&config.db_path)?;
        Ok(Self::new(config, store))
    }

    pub fn frames(&self) -> &FrameService {
        &self.frames
    }

    pub fn store(&self) -> &StatsStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Chart document for a run, generated on first request.
    pub async fn chart(
        &self,
        inputs: &RunInputs,
        snapshot: Arc<PopulationSnapshot>,
    ) -> PipelineResult<ChartDocument> {
        if let Some(stored) = self.store.get_chart(inputs.run_id)? {
            debug!(run_id = inputs.run_id, generated_at = %stored.generated_at, "chart document hit");
            return Ok(stored.document);
        }
        info!(run_id = inputs.run_id, "chart document missing, generating");
        self.regenerate_chart(inputs, snapshot, CancelToken::new()).await
    }

    /// Run the chart pass and replace the stored document.
    pub async fn regenerate_chart(
        &self,
        inputs: &RunInputs,
        snapshot: Arc<PopulationSnapshot>,
        cancel: CancelToken,
    ) -> PipelineResult<ChartDocument> {
        let run_id = inputs.run_id;
        let simdata = inputs.simdata.clone();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let data = stats::generate_chart(&simdata, &snapshot, &cancel)?;
            let document = ChartDocument { data };
            store.put_chart(run_id, &document)?;
            info!(run_id, timesteps = document.data.len(), "chart document stored");
            Ok(document)
        })
        .await?
    }

    /// Re-ingest a run's location rows from scratch.
    pub async fn ingest_locations(
        &self,
        inputs: &RunInputs,
        cancel: CancelToken,
    ) -> PipelineResult<IngestSummary> {
        let inputs = inputs.clone();
        let store = self.store.clone();
        let batch_size = self.config.stats_batch_size;
        tokio::task::spawn_blocking(move || {
            let removed = store.delete_location_rows(inputs.run_id)?;
            if removed > 0 {
                debug!(run_id = inputs.run_id, removed, "previous location rows removed");
            }
            stats::ingest_locations(&inputs, &store, batch_size, cancel)
        })
        .await?
    }

    /// Series for one stored location.
    pub async fn location_chart(
        &self,
        run_id: i64,
        location_id: &str,
        range: TimeRange,
        snapshot: Arc<PopulationSnapshot>,
    ) -> PipelineResult<ChartDataset> {
        let store = self.store.clone();
        let location_id = location_id.to_string();
        tokio::task::spawn_blocking(move || {
            stats::location_chart(&store, run_id, &location_id, &range, &snapshot)
        })
        .await?
    }

    /// Upload hook: rebuild the frame cache, the chart document and the
    /// location rows concurrently in background tasks.
    pub fn on_upload(&self, inputs: RunInputs, snapshot: PopulationSnapshot) -> UploadHandle {
        let run_id = inputs.run_id;
        let cancel = CancelToken::new();
        let snapshot = Arc::new(snapshot);
        info!(run_id, "run uploaded, scheduling background builds");

        let frames = {
            let service = self.frames.clone();
            let inputs = inputs.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = service.cache().evict(run_id) {
                    warn!(run_id, error = %e, "failed to evict previous frame cache");
                }
                service.build(&inputs, cancel).await
            })
        };
        let chart = {
            let service = self.clone();
            let inputs = inputs.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { service.regenerate_chart(&inputs, snapshot, cancel).await })
        };
        let locations = {
            let service = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { service.ingest_locations(&inputs, cancel).await })
        };

        UploadHandle {
            run_id,
            cancel,
            frames,
            chart,
            locations,
        }
    }
}

/// Background work started by [`RunService::on_upload`].
#[derive(Debug)]
pub struct UploadHandle {
    run_id: i64,
    cancel: CancelToken,
    frames: JoinHandle<PipelineResult<BuildSummary>>,
    chart: JoinHandle<PipelineResult<ChartDocument>>,
    locations: JoinHandle<PipelineResult<IngestSummary>>,
}

/// Results of the three upload tasks.
#[derive(Debug)]
pub struct UploadReport {
    pub run_id: i64,
    pub frames: PipelineResult<BuildSummary>,
    pub chart: PipelineResult<ChartDocument>,
    pub locations: PipelineResult<IngestSummary>,
}

impl UploadReport {
    pub fn is_ok(&self) -> bool {
        self.frames.is_ok() && self.chart.is_ok() && self.locations.is_ok()
    }
}

impl UploadHandle {
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Ask every task to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared by the three tasks, for wiring to an external signal.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for all three tasks. Each result is reported independently.
    pub async fn wait(self) -> UploadReport {
        let (frames, chart, locations) = tokio::join!(self.frames, self.chart, self.locations);
        let report = UploadReport {
            run_id: self.run_id,
            frames: frames.map_err(PipelineError::from).and_then(|r| r),
            chart: chart.map_err(PipelineError::from).and_then(|r| r),
            locations: locations.map_err(PipelineError::from).and_then(|r| r),
        };
        for (task, result) in [
            ("frames", report.frames.as_ref().err()),
            ("chart", report.chart.as_ref().err()),
            ("locations", report.locations.as_ref().err()),
        ] {
            if let Some(e) = result {
                warn!(run_id = report.run_id, task, error = %e, "upload task failed");
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::papdata::PapData;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RunService, RunInputs, PopulationSnapshot) {
        let dir = TempDir::new().unwrap();
        let simdata = dir.path().join("simdata.json");
        let patterns = dir.path().join("patterns.json");
        std::fs::write(&simdata, r#"{"60":{"flu":{"p1":1}},"120":{"flu":{"p1":1,"p2":1}}}"#)
            .unwrap();
        std::fs::write(
            &patterns,
            r#"{"60":{"homes":{"1":["p1","p2"]},"places":{}},"120":{"homes":{"1":["p1"]},"places":{"9":["p2"]}}}"#,
        )
        .unwrap();
        let pap = PapData::from_slice(
            br#"{"people":{"p1":{"age":10,"sex":0},"p2":{"age":60,"sex":1}},"homes":{"1":{}},"places":{"9":{}}}"#,
        )
        .unwrap();
        let config = PipelineConfig::default()
            .with_cache_dir(dir.path().join("cache"))
            .with_db_path(dir.path().join("stats.db"));
        let service = RunService::new(config, StatsStore::memory().unwrap());
        let inputs = pap.run_inputs(4, &simdata, &patterns, 2);
        (dir, service, inputs, pap.snapshot())
    }

    #[tokio::test]
    async fn test_chart_generated_lazily_then_served_from_store() {
        let (_dir, service, inputs, snapshot) = setup();
        assert!(service.store().get_chart(4).unwrap().is_none());

        let first = service.chart(&inputs, Arc::new(snapshot.clone())).await.unwrap();
        assert_eq!(first.data.len(), 2);
        assert!(service.store().get_chart(4).unwrap().is_some());

        // Removing the source proves the second call does not recompute.
        std::fs::remove_file(&inputs.simdata).unwrap();
        let second = service.chart(&inputs, Arc::new(snapshot)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_on_upload_builds_everything() {
        let (_dir, service, inputs, snapshot) = setup();
        let report = service.on_upload(inputs.clone(), snapshot.clone()).wait().await;
        assert!(report.is_ok());

        let build = report.frames.unwrap();
        assert_eq!(build.frames, 2);
        assert!(build.published.is_some());
        assert!(service.frames().cache().exists(4));
        assert!(service.store().get_chart(4).unwrap().is_some());
        assert_eq!(report.locations.unwrap().rows, 3);

        let chart = service
            .location_chart(4, "place:9", TimeRange::default(), Arc::new(snapshot))
            .await
            .unwrap();
        assert_eq!(chart.len(), 1);
        assert_eq!(chart.sexes[0].get("female"), 1);
    }
}
