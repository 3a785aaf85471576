//! Chunk worker
//!
//! One ranged GET for a sub-range of a segment, streamed through a
//! fixed-size buffer into positional writes at segment-relative offsets.
//! After every full-buffer flush the worker sleeps according to the current
//! pacing target.

use crate::engine::accounting::ProgressUpdate;
use crate::engine::rate::RateHandle;
use crate::engine::segment_file::SegmentFile;
use crate::error::EngineError;
use futures::StreamExt;
use parget_types::ByteSpan;
use reqwest::{header, Client, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

/// The capabilities a chunk worker runs against. No back-references to the
/// segment or downloader.
pub(crate) struct ChunkContext {
    pub client: Client,
    pub url: Url,
    pub user_agent: String,
    pub file: SegmentFile,
    /// Absolute offset of the owning segment's first byte.
    pub seg_start: u64,
    pub buffer_size: usize,
    pub progress: mpsc::Sender<ProgressUpdate>,
    pub rate: RateHandle,
    pub cancel: CancellationToken,
    /// Total size of the resource; a chunk spanning all of it may be
    /// answered with a plain `200 OK`.
    pub resource_size: u64,
}

/// How a chunk ended short of success. `written` bytes of the chunk are
/// already durable in the segment file in every case.
pub(crate) enum ChunkError {
    /// Socket-level trouble; the unfinished tail can be re-claimed.
    Transient { written: u64, source: EngineError },
    Cancelled { written: u64 },
    /// Disk errors and protocol violations; aborts the download.
    Fatal(EngineError),
}

enum FailKind {
    Transient(EngineError),
    Cancelled,
    Fatal(EngineError),
}

#[derive(Default)]
struct StreamState {
    received: u64,
    written: u64,
}

/// Fetch `span` and write it into the segment file.
pub(crate) async fn run(ctx: &ChunkContext, span: ByteSpan) -> Result<(), ChunkError> {
    let mut st = StreamState::default();
    let result = run_inner(ctx, span, &mut st).await;

    if let Err(kind) = result {
        // Buffered-but-unflushed bytes are dropped with the worker.
        let unflushed = st.received.saturating_sub(st.written);
        if unflushed > 0 {
            let _ = ctx
                .progress
                .send(ProgressUpdate::BytesDiscarded(unflushed))
                .await;
        }
        return Err(match kind {
            FailKind::Transient(source) => ChunkError::Transient {
                written: st.written,
                source,
            },
            FailKind::Cancelled => ChunkError::Cancelled { written: st.written },
            FailKind::Fatal(e) => ChunkError::Fatal(e),
        });
    }

    trace!(start = span.start, end = span.end, "chunk complete");
    Ok(())
}

async fn run_inner(
    ctx: &ChunkContext,
    span: ByteSpan,
    st: &mut StreamState,
) -> Result<(), FailKind> {
    let expected = span.len();
    let host = ctx.url.host_str().unwrap_or_default().to_string();

    let request = ctx
        .client
        .get(ctx.url.clone())
        .header(header::HOST, host)
        .header(header::USER_AGENT, &ctx.user_agent)
        .header(header::RANGE, format!("bytes={}-{}", span.start, span.end - 1));

    let response = request
        .send()
        .await
        .map_err(|e| FailKind::Transient(EngineError::Http(e)))?;

    let covers_resource = span.start == 0 && span.end == ctx.resource_size;
    match response.status() {
        StatusCode::PARTIAL_CONTENT => {}
        // a server ignoring Range streams the whole resource, which is
        // only acceptable when that is exactly what was asked for
        StatusCode::OK if covers_resource => {}
        status => {
            return Err(FailKind::Fatal(EngineError::UnexpectedStatus {
                status: status.as_u16(),
            }))
        }
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(ctx.buffer_size);

    loop {
        let item = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(FailKind::Cancelled),
            item = stream.next() => item,
        };
        let data = match item {
            None => break,
            Some(Ok(data)) => data,
            Some(Err(e)) => return Err(FailKind::Transient(EngineError::Read(e))),
        };

        // Cap at the claimed span; a misbehaving origin may stream past it.
        let take = (expected - st.received).min(data.len() as u64) as usize;
        if take == 0 {
            break;
        }
        st.received += take as u64;
        let _ = ctx
            .progress
            .send(ProgressUpdate::BytesReceived(take as u64))
            .await;

        let mut data = &data[..take];
        while !data.is_empty() {
            let free = ctx.buffer_size - buffer.len();
            let fill = free.min(data.len());
            buffer.extend_from_slice(&data[..fill]);
            data = &data[fill..];
            if buffer.len() == ctx.buffer_size {
                let n = buffer.len();
                flush(ctx, span, &mut buffer, st).await?;
                ctx.rate.pace(n).await;
            }
        }

        if st.received == expected {
            break;
        }
    }

    // Residual bytes on EOF.
    flush(ctx, span, &mut buffer, st).await?;

    if st.written < expected {
        return Err(FailKind::Transient(EngineError::ShortBody {
            received: st.received,
            expected,
        }));
    }
    Ok(())
}

/// Positional write of the buffer at this chunk's segment-relative offset.
async fn flush(
    ctx: &ChunkContext,
    span: ByteSpan,
    buffer: &mut Vec<u8>,
    st: &mut StreamState,
) -> Result<(), FailKind> {
    if buffer.is_empty() {
        return Ok(());
    }
    let offset = (span.start - ctx.seg_start) + st.written;
    let n = buffer.len() as u64;
    let buf = std::mem::take(buffer);
    let (mut buf, took) = ctx
        .file
        .write_at(buf, offset)
        .await
        .map_err(FailKind::Fatal)?;
    buf.clear();
    *buffer = buf;
    st.written += n;
    let _ = ctx
        .progress
        .send(ProgressUpdate::BytesWritten { n, took })
        .await;
    Ok(())
}
