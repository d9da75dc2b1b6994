//! Response body plumbing: a blocking `Write` over a bounded channel.
//!
//! Build tasks run on the blocking pool and write the document into a
//! [`BodySink`]; the request side consumes [`FrameBody`] as a byte stream.
//! When the consumer drops the body the next send fails, the shared
//! [`CancelToken`] is tripped, and writes return `BrokenPipe`. Callers that
//! may go long without writing poll [`BodySink::ensure_open`] instead.

use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::cancel::CancelToken;
use crate::error::PipelineError;

/// Chunks in flight between the build task and the consumer.
const CHANNEL_DEPTH: usize = 16;

/// Streamed response body.
#[derive(Debug)]
pub struct FrameBody {
    inner: ReceiverStream<io::Result<Bytes>>,
}

impl Stream for FrameBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl FrameBody {
    /// Drain the whole body into memory.
    pub async fn collect_bytes(mut self) -> io::Result<Vec<u8>> {
        use futures::StreamExt;

        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// Create a connected sink/body pair.
pub(crate) fn channel(chunk_bytes: usize, gzip: bool, cancel: CancelToken) -> (BodySink, FrameBody) {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let writer = ChannelWriter {
        tx,
        buf: Vec::with_capacity(chunk_bytes),
        chunk_bytes,
        cancel,
    };
    let sink = if gzip {
        BodySink::Gzip(GzEncoder::new(writer, Compression::default()))
    } else {
        BodySink::Plain(writer)
    };
    (
        sink,
        FrameBody {
            inner: ReceiverStream::new(rx),
        },
    )
}

pub(crate) struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    chunk_bytes: usize,
    cancel: CancelToken,
}

impl ChannelWriter {
    fn send_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(disconnected());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(self.chunk_bytes),
        ));
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            self.cancel.cancel();
            disconnected()
        })
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(disconnected());
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.chunk_bytes {
            self.send_chunk()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_chunk()
    }
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response consumer went away")
}

/// Map a sink write failure: a vanished consumer is a cancellation.
pub(crate) fn sink_error(err: io::Error) -> PipelineError {
    if err.kind() == io::ErrorKind::BrokenPipe {
        PipelineError::Cancelled
    } else {
        PipelineError::Io(err)
    }
}

/// Writer side of a response, optionally gzip-compressed.
pub(crate) enum BodySink {
    Plain(ChannelWriter),
    Gzip(GzEncoder<ChannelWriter>),
}

impl BodySink {
    /// Flush everything, closing the gzip member if any.
    pub(crate) fn finish(self) -> io::Result<()> {
        match self {
            BodySink::Plain(mut w) => w.flush(),
            BodySink::Gzip(encoder) => {
                let mut w = encoder.finish()?;
                w.flush()
            }
        }
    }

    /// Fails with `Cancelled` once the consumer has dropped the body, tripping
    /// the shared token. Needed where nothing is written for a while.
    pub(crate) fn ensure_open(&self) -> Result<(), PipelineError> {
        let writer = match self {
            BodySink::Plain(w) => w,
            BodySink::Gzip(encoder) => encoder.get_ref(),
        };
        if writer.tx.is_closed() {
            writer.cancel.cancel();
        }
        writer.cancel.check()
    }

    /// Report a terminal failure to the consumer, best effort.
    pub(crate) fn fail(self, err: &PipelineError) {
        let tx = match &self {
            BodySink::Plain(w) => w.tx.clone(),
            BodySink::Gzip(encoder) => encoder.get_ref().tx.clone(),
        };
        drop(self);
        let _ = tx.blocking_send(Err(io::Error::other(err.to_string())));
    }
}

impl Write for BodySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            BodySink::Plain(w) => w.write(data),
            BodySink::Gzip(w) => w.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BodySink::Plain(w) => w.flush(),
            BodySink::Gzip(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[tokio::test]
    async fn test_plain_body_chunks_and_flushes() {
        let (mut sink, body) = channel(4, false, CancelToken::new());
        let writer = tokio::task::spawn_blocking(move || {
            sink.write_all(b"hello ").unwrap();
            sink.write_all(b"world").unwrap();
            sink.finish().unwrap();
        });
        let bytes = body.collect_bytes().await.unwrap();
        writer.await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn test_gzip_body_decodes() {
        let (mut sink, body) = channel(8, true, CancelToken::new());
        let writer = tokio::task::spawn_blocking(move || {
            sink.write_all(br#"{"data":{}}"#).unwrap();
            sink.finish().unwrap();
        });
        let compressed = body.collect_bytes().await.unwrap();
        writer.await.unwrap();

        let mut plain = String::new();
        GzDecoder::new(&compressed[..])
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain, r#"{"data":{}}"#);
    }

    #[tokio::test]
    async fn test_dropped_body_cancels_writer() {
        let cancel = CancelToken::new();
        let (mut sink, body) = channel(1, false, cancel.clone());
        drop(body);
        let result = tokio::task::spawn_blocking(move || sink.write_all(b"x"))
            .await
            .unwrap();
        let err = result.unwrap_err();
        assert!(sink_error(err).is_cancellation());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_ensure_open_notices_dropped_body_without_writing() {
        let cancel = CancelToken::new();
        let (sink, body) = channel(1024, true, cancel.clone());
        assert!(sink.ensure_open().is_ok());
        assert!(!cancel.is_cancelled());

        drop(body);
        assert!(sink.ensure_open().unwrap_err().is_cancellation());
        assert!(cancel.is_cancelled());
    }
}
