//! Streaming merge-join frame cache and outbreak statistics for epidemic
//! simulation runs.
//!
//! A run produces two large keyed JSON streams: `simdata` (per-timestep
//! infection states) and `patterns` (per-timestep locations of every person).
//! This crate provides:
//!
//! - Incremental decoding of both streams, plain or gzip
//! - A merge-join cursor aligning the streams by timestep
//! - Compact per-timestep frames and place hotspot detection
//! - A per-run frame cache with atomic publish, ETags and byte-level splicing
//! - A streaming response controller (cache hit, or live build plus cache fill)
//! - Chart series and per-location statistics in SQLite
//!
//! # Quick Start
//!
//! ```no_run
//! use epistream_core::{
//!     CancelToken, FrameRequest, FrameResponse, FrameService, PapData, PipelineConfig,
//!     ResponseEnvelope,
//! };
//! use epistream_core::decode::Compression;
//! use futures::StreamExt;
//! use std::path::Path;
//!
//! # async fn example() -> epistream_core::PipelineResult<()> {
//! let config = PipelineConfig::from_env();
//! let service = FrameService::new(config);
//!
//! let papdata = PapData::load(Path::new("papdata.json"), Compression::Auto)?;
//! let inputs = papdata.run_inputs(42, "simdata.json.gz", "patterns.json.gz", 2880);
//! let envelope = ResponseEnvelope::for_run(
//!     "baseline",
//!     inputs.length,
//!     &serde_json::json!({}),
//!     &papdata.client_view(),
//! )?;
//!
//! match service
//!     .respond(&inputs, envelope, FrameRequest::full(), CancelToken::new())
//!     .await?
//! {
//!     FrameResponse::NotModified { .. } => {}
//!     FrameResponse::Streaming(mut response) => {
//!         while let Some(chunk) = response.body.next().await {
//!             let _bytes = chunk?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! See [`config`] for the `EPISTREAM_*` environment variables.

pub mod body;
pub mod cache;
pub mod cancel;
pub mod compact;
pub mod config;
pub mod decode;
pub mod envelope;
pub mod error;
pub mod hotspot;
pub mod join;
pub mod model;
pub mod papdata;
pub mod service;
pub mod stats;
pub mod store;
pub mod stream;

// Re-export main types
pub use body::FrameBody;
pub use cache::{FrameCache, OpenArtifact, PublishedArtifact};
pub use cancel::CancelToken;
pub use compact::FrameCompactor;
pub use config::PipelineConfig;
pub use envelope::ResponseEnvelope;
pub use error::{PipelineError, PipelineResult};
pub use hotspot::{HotspotDetector, DEFAULT_HOTSPOT_FACTOR};
pub use join::{Aligned, JoinStats, MergeJoin};
pub use model::{
    CompactFrame, HotspotMap, InfectionRecord, MovementRecord, RunInputs, StateFlag, TimeRange,
    Timestep,
};
pub use papdata::{PapData, PopulationSnapshot};
pub use service::{RunService, UploadHandle, UploadReport};
pub use stats::{ChartDataset, ChartDocument, IngestSummary, LocationStatRow, TimePoint};
pub use store::StatsStore;
pub use stream::{
    accepts_gzip, etag_matches, BuildSummary, FrameRequest, FrameResponse, FrameService, Outcome,
    ResponseSource, StreamingResponse,
};
