use anyhow::Context;
use epistream_core::{
    FrameRequest, FrameResponse, FrameService, Outcome, ResponseEnvelope, StreamingResponse,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::common::{cancel_on_ctrl_c, load_config, load_run, range};
use crate::cli::args::{FramesArgs, GlobalArgs};
use crate::exit_codes::{CANCELLED, SUCCESS};

/// Stream one frames document to `--out` (or stdout).
pub async fn run(global: &GlobalArgs, args: FramesArgs) -> anyhow::Result<i32> {
    let config = load_config(global)?;
    let (papdata, inputs) = load_run(&args.run)?;

    let zone = match &args.zone {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("failed to read zone {}", path.display()))?;
            serde_json::from_slice::<Value>(&raw)
                .with_context(|| format!("invalid zone json {}", path.display()))?
        }
        None => Value::Object(Default::default()),
    };
    let name = if args.name.is_empty() {
        format!("run {}", inputs.run_id)
    } else {
        args.name.clone()
    };
    let envelope = ResponseEnvelope::for_run(&name, inputs.length, &zone, &papdata.client_view())?;

    let mut request = FrameRequest::full()
        .with_range(range(args.from, args.to))
        .with_gzip(args.gzip);
    if let Some(tag) = &args.if_none_match {
        request = request.with_if_none_match(tag.clone());
    }

    let service = FrameService::new(config);
    match service
        .respond(&inputs, envelope, request, cancel_on_ctrl_c())
        .await?
    {
        FrameResponse::NotModified { etag } => {
            eprintln!("not modified ({})", etag);
            Ok(SUCCESS)
        }
        FrameResponse::Streaming(response) => stream_to_output(response, &args).await,
    }
}

async fn stream_to_output(response: StreamingResponse, args: &FramesArgs) -> anyhow::Result<i32> {
    info!(
        source = ?response.source,
        etag = response.etag.as_deref().unwrap_or("-"),
        encoding = response.content_encoding.unwrap_or("identity"),
        "streaming frames"
    );

    let mut out: Box<dyn AsyncWrite + Unpin + Send> = match &args.out {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let StreamingResponse { mut body, task, .. } = response;
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => out.write_all(&bytes).await.context("failed to write frames")?,
            Err(e) => {
                // The task result carries the typed error.
                warn!(error = %e, "frames body ended with error");
                break;
            }
        }
    }
    out.flush().await?;
    drop(body);

    match task.await?? {
        Outcome::Served { bytes } => {
            info!(bytes, "served from cache");
            Ok(SUCCESS)
        }
        Outcome::Built(summary) => {
            info!(
                frames = summary.frames,
                frames_sent = summary.frames_sent,
                hotspots = summary.hotspots,
                cached = summary.published.is_some(),
                "built frames"
            );
            Ok(SUCCESS)
        }
        Outcome::Cancelled => Ok(CANCELLED),
    }
}
