//! Streaming response controller for frames documents.
//!
//! Per request:
//!
//! ```text
//! CacheCheck ──hit──▶ ServeFromCache (splice, or decode+filter for a range)
//!     │
//!     └─miss─▶ ComputeAndStream: merge-join live, each frame goes to the
//!              cache temp file and (if in range) to the response; publish
//!              on completion, discard on cancel or failure
//! ```
//!
//! Build and copy work runs on the blocking pool; the caller gets a
//! [`FrameBody`] stream immediately. Dropping the body cancels the task.

use std::io::Write;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::body::{self, sink_error, BodySink, FrameBody};
use crate::cache::{self, CacheWriter, FrameCache, OpenArtifact, PublishedArtifact};
use crate::cancel::CancelToken;
use crate::compact::FrameCompactor;
use crate::config::PipelineConfig;
use crate::decode::{Compression, InfectionStream, MovementStream};
use crate::envelope::ResponseEnvelope;
use crate::error::PipelineResult;
use crate::hotspot::HotspotDetector;
use crate::join::{JoinStats, MergeJoin};
use crate::model::{HotspotMap, InfectionRecord, MovementRecord, RunInputs, TimeRange, Timestep};

/// Merge-join over a run's simdata and patterns files.
pub type FrameJoin = MergeJoin<InfectionStream, MovementStream, InfectionRecord, MovementRecord>;

/// Open both source streams of a run and join them.
pub fn open_frame_join(inputs: &RunInputs, cancel: CancelToken) -> PipelineResult<FrameJoin> {
    let infection = InfectionStream::open(&inputs.simdata, Compression::Auto)?;
    let movement = MovementStream::open(&inputs.patterns, Compression::Auto)?;
    Ok(MergeJoin::new(infection, movement, cancel))
}

/// Transport-level options of one frames request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameRequest {
    pub range: TimeRange,
    pub gzip: bool,
    pub if_none_match: Option<String>,
}

impl FrameRequest {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn with_if_none_match(mut self, value: impl Into<String>) -> Self {
        self.if_none_match = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Live,
}

/// What a completed build did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub run_id: i64,
    /// Frames produced by the merge-join.
    pub frames: u64,
    /// Frames written to the response (range-filtered).
    pub frames_sent: u64,
    pub hotspots: usize,
    pub join: JoinStats,
    /// `None` when the cache could not be written and the build fell back.
    pub published: Option<PublishedArtifact>,
}

/// Terminal state of a response task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Served { bytes: u64 },
    Built(BuildSummary),
    Cancelled,
}

/// A response whose body is being produced in the background.
#[derive(Debug)]
pub struct StreamingResponse {
    pub source: ResponseSource,
    pub etag: Option<String>,
    pub content_encoding: Option<&'static str>,
    pub body: FrameBody,
    pub task: JoinHandle<PipelineResult<Outcome>>,
}

#[derive(Debug)]
pub enum FrameResponse {
    NotModified { etag: String },
    Streaming(StreamingResponse),
}

/// Serves frames documents from the cache, building it on a miss.
#[derive(Debug, Clone)]
pub struct FrameService {
    cache: FrameCache,
    config: PipelineConfig,
}

impl FrameService {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            cache: FrameCache::new(&config),
            config,
        }
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// `(etag, exists)` check for the route layer; `None` when not cached.
    pub fn cached_etag(&self, run_id: i64) -> Option<String> {
        self.cache.etag(run_id)
    }

    /// Answer one frames request.
    pub async fn respond(
        &self,
        inputs: &RunInputs,
        envelope: ResponseEnvelope,
        request: FrameRequest,
        cancel: CancelToken,
    ) -> PipelineResult<FrameResponse> {
        let run_id = inputs.run_id;
        let content_encoding = request.gzip.then_some("gzip");

        if let Some(artifact) = self.cache.open(run_id) {
            let etag = artifact.etag_for(&request.range);
            if request
                .if_none_match
                .as_deref()
                .is_some_and(|header| etag_matches(header, &etag))
            {
                debug!(run_id, etag = %etag, "frames not modified");
                return Ok(FrameResponse::NotModified { etag });
            }

            debug!(run_id, range = ?request.range, "frames cache hit");
            let (sink, body) = body::channel(self.config.chunk_bytes, request.gzip, cancel);
            let range = request.range;
            let task = tokio::task::spawn_blocking(move || {
                settle(run_id, serve_cached(artifact, &envelope, &range, sink))
            });
            return Ok(FrameResponse::Streaming(StreamingResponse {
                source: ResponseSource::Cache,
                etag: Some(etag),
                content_encoding,
                body,
                task,
            }));
        }

        info!(run_id, "frames cache miss, computing live");
        let build = {
            let inputs = inputs.clone();
            let cache = self.cache.clone();
            let factor = self.config.hotspot_factor;
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                LiveBuild::open(&inputs, &cache, factor, cancel, false)
            })
            .await??
        };

        let (sink, body) = body::channel(self.config.chunk_bytes, request.gzip, cancel);
        let range = request.range;
        let task = tokio::task::spawn_blocking(move || {
            let mut response = LiveResponse::new(sink, envelope, range);
            let result = build.run(Some(&mut response));
            let result = complete(response.sink, result);
            settle(run_id, result.map(Outcome::Built))
        });

        Ok(FrameResponse::Streaming(StreamingResponse {
            source: ResponseSource::Live,
            etag: None,
            content_encoding,
            body,
            task,
        }))
    }

    /// Build and publish the artifact without serving anyone.
    pub async fn build(&self, inputs: &RunInputs, cancel: CancelToken) -> PipelineResult<BuildSummary> {
        let inputs = inputs.clone();
        let cache = self.cache.clone();
        let factor = self.config.hotspot_factor;
        let summary = tokio::task::spawn_blocking(move || {
            LiveBuild::open(&inputs, &cache, factor, cancel, true)?.run(None)
        })
        .await??;
        info!(
            run_id = summary.run_id,
            frames = summary.frames,
            hotspots = summary.hotspots,
            "frames cache built"
        );
        Ok(summary)
    }
}

fn serve_cached(
    artifact: OpenArtifact,
    envelope: &ResponseEnvelope,
    range: &TimeRange,
    mut sink: BodySink,
) -> PipelineResult<Outcome> {
    let result = write_cached(artifact, envelope, range, &mut sink);
    complete(sink, result).map(|bytes| Outcome::Served { bytes })
}

fn write_cached(
    artifact: OpenArtifact,
    envelope: &ResponseEnvelope,
    range: &TimeRange,
    sink: &mut BodySink,
) -> PipelineResult<u64> {
    if range.is_unbounded() {
        return FrameCache::splice(artifact, envelope.header(), envelope.footer(), sink)
            .map_err(sink_error);
    }
    let middle = FrameCache::read_range(artifact, range)?;
    for part in [envelope.header(), &middle[..], envelope.footer()] {
        sink.write_all(part).map_err(sink_error)?;
    }
    Ok((envelope.header().len() + middle.len() + envelope.footer().len()) as u64)
}

/// Finish or fail the body according to the task result.
fn complete<T>(sink: BodySink, result: PipelineResult<T>) -> PipelineResult<T> {
    match result {
        Ok(value) => {
            sink.finish().map_err(sink_error)?;
            Ok(value)
        }
        Err(e) if e.is_cancellation() => Err(e),
        Err(e) => {
            sink.fail(&e);
            Err(e)
        }
    }
}

fn settle(run_id: i64, result: PipelineResult<Outcome>) -> PipelineResult<Outcome> {
    match result {
        Err(e) if e.is_cancellation() => {
            info!(run_id, "frames response cancelled by client");
            Ok(Outcome::Cancelled)
        }
        Err(e) => {
            warn!(run_id, error = %e, "frames response failed");
            Err(e)
        }
        ok => ok,
    }
}

/// Response side of a live build.
struct LiveResponse {
    sink: BodySink,
    envelope: ResponseEnvelope,
    range: TimeRange,
    sent: u64,
}

impl LiveResponse {
    fn new(sink: BodySink, envelope: ResponseEnvelope, range: TimeRange) -> Self {
        Self {
            sink,
            envelope,
            range,
            sent: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> PipelineResult<()> {
        self.sink.write_all(bytes).map_err(sink_error)
    }

    fn begin(&mut self) -> PipelineResult<()> {
        let header = self.envelope.header().to_vec();
        self.write(&header)?;
        self.write(cache::SIMDATA_PREFIX)
    }

    fn entry(&mut self, timestep: Timestep, entry: &[u8]) -> PipelineResult<()> {
        // Out-of-range frames write nothing, so poll for a disconnect here.
        self.sink.ensure_open()?;
        if !self.range.contains(timestep) {
            return Ok(());
        }
        if self.sent > 0 {
            self.write(b",")?;
        }
        self.write(entry)?;
        self.sent += 1;
        Ok(())
    }

    fn end(&mut self, hotspots: &HotspotMap) -> PipelineResult<()> {
        let mut trailer = Vec::new();
        cache::write_trailer(&mut trailer, &cache::filter_hotspots(hotspots, &self.range))?;
        trailer.extend_from_slice(self.envelope.footer());
        self.write(&trailer)
    }
}

/// One merge-join pass feeding the cache writer and optionally a response.
struct LiveBuild {
    run_id: i64,
    join: FrameJoin,
    compactor: FrameCompactor,
    detector: HotspotDetector,
    writer: Option<CacheWriter>,
}

impl LiveBuild {
    /// Open sources and the cache temp file. With `require_cache` unset a
    /// cache that cannot be created degrades to streaming only.
    fn open(
        inputs: &RunInputs,
        cache: &FrameCache,
        hotspot_factor: u32,
        cancel: CancelToken,
        require_cache: bool,
    ) -> PipelineResult<Self> {
        let join = open_frame_join(inputs, cancel)?;
        let writer = match cache.begin_build(inputs.run_id) {
            Ok(writer) => Some(writer),
            Err(e) if !require_cache => {
                warn!(run_id = inputs.run_id, error = %e, "cache unavailable, streaming without it");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            run_id: inputs.run_id,
            join,
            compactor: FrameCompactor::new(inputs.home_ids.clone(), inputs.place_ids.clone()),
            detector: HotspotDetector::with_factor(inputs.place_ids.clone(), hotspot_factor),
            writer,
        })
    }

    fn run(mut self, mut response: Option<&mut LiveResponse>) -> PipelineResult<BuildSummary> {
        let serving = response.is_some();
        if let Some(r) = response.as_deref_mut() {
            r.begin()?;
        }

        let mut frames = 0;
        while let Some(aligned) = self.join.next() {
            let aligned = aligned?;
            let frame = self.compactor.compact_aligned(&aligned);
            self.detector.observe(aligned.timestep, &frame);
            let entry = cache::encode_entry(aligned.timestep, &frame)?;
            frames += 1;

            if let Some(writer) = self.writer.as_mut() {
                if let Err(e) = writer.append_entry(&entry) {
                    if !serving {
                        return Err(e);
                    }
                    warn!(run_id = self.run_id, error = %e, "cache write failed, continuing without cache");
                    self.writer = None;
                }
            }
            if let Some(r) = response.as_deref_mut() {
                r.entry(aligned.timestep, &entry)?;
            }
        }

        let join = self.join.stats();
        if join.skipped_infection > 0 || join.skipped_movement > 0 {
            debug!(
                run_id = self.run_id,
                skipped_infection = join.skipped_infection,
                skipped_movement = join.skipped_movement,
                "timesteps without a partner were dropped"
            );
        }

        let hotspot_count = self.detector.hotspot_count();
        let hotspots = self.detector.into_hotspots();

        // The response must be complete before the artifact is published;
        // on a disconnect the writer is dropped unfinished.
        let mut frames_sent = frames;
        if let Some(r) = response {
            r.end(&hotspots)?;
            r.sink.flush().map_err(sink_error)?;
            r.sink.ensure_open()?;
            frames_sent = r.sent;
        }

        let published = match self.writer.take() {
            Some(writer) => match writer.finish(&hotspots) {
                Ok(published) => Some(published),
                Err(e) if !serving => return Err(e),
                Err(e) => {
                    warn!(run_id = self.run_id, error = %e, "cache publish failed");
                    None
                }
            },
            None => None,
        };

        Ok(BuildSummary {
            run_id: self.run_id,
            frames,
            frames_sent,
            hotspots: hotspot_count,
            join,
            published,
        })
    }
}

/// Weak comparison of an `If-None-Match` header against a validator.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let opaque = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let wanted = opaque(etag);
    if_none_match
        .split(',')
        .any(|candidate| candidate.trim() == "*" || opaque(candidate) == wanted)
}

/// Whether an `Accept-Encoding` header admits a gzip body.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    let mut wildcard = false;
    for item in accept_encoding.split(',') {
        let mut parts = item.split(';');
        let coding = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let q = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        match coding.as_str() {
            "gzip" | "x-gzip" => return q > 0.0,
            "*" => wildcard = q > 0.0,
            _ => {}
        }
    }
    wildcard
}
