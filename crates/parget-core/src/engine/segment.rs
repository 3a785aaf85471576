//! Segment coordinator
//!
//! A segment owns a contiguous slice of the resource and a backing file in
//! the temp directory. It partitions its span through the range layout and
//! runs a bounded pool of claim-loop workers until every byte is claimed
//! and written. Transient chunk failures re-expose their unfinished tail
//! and are retried a bounded number of times; write failures and protocol
//! violations abort the whole download.

use crate::engine::accounting::ProgressUpdate;
use crate::engine::chunk_worker::{self, ChunkContext, ChunkError};
use crate::engine::range_layout::RangeLayout;
use crate::engine::rate::RateHandle;
use crate::engine::segment_file::SegmentFile;
use crate::error::EngineError;
use parget_types::ByteSpan;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

pub(crate) struct SegmentRun {
    pub id: u64,
    /// Absolute byte range `[seg_start, seg_end)`.
    pub span: ByteSpan,
    pub path: PathBuf,
    /// Completed intervals recorded by a previous run, absolute offsets.
    pub seed: Vec<ByteSpan>,
    pub max_workers: usize,
    pub max_chunk_size: u64,
    pub retry_limit: u32,
    /// Total size of the resource, for whole-resource status handling.
    pub resource_size: u64,
    pub client: Client,
    pub url: Url,
    pub user_agent: String,
    pub buffer_size: usize,
    pub progress: mpsc::Sender<ProgressUpdate>,
    pub rate: RateHandle,
    pub cancel: CancellationToken,
}

impl SegmentRun {
    /// Drive the segment to completion. On success the backing file holds
    /// exactly the segment's bytes and the returned intervals coalesce to
    /// the full span.
    pub async fn run(self) -> Result<Vec<ByteSpan>, EngineError> {
        debug!(
            segment = self.id,
            start = self.span.start,
            end = self.span.end,
            "segment starting"
        );

        let (file, discarded) = SegmentFile::open(self.path.clone(), self.span.len()).await?;

        let layout = Arc::new(Mutex::new(RangeLayout::new(self.span)));
        if !discarded && !self.seed.is_empty() {
            layout.lock().seed_completed(&self.seed);
        }

        // A fatal worker stops its siblings without touching the rest of
        // the download; the parent token still reaches everyone.
        let seg_cancel = self.cancel.child_token();

        let ctx = Arc::new(ChunkContext {
            client: self.client,
            url: self.url,
            user_agent: self.user_agent,
            file: file.clone(),
            seg_start: self.span.start,
            buffer_size: self.buffer_size,
            progress: self.progress.clone(),
            rate: self.rate,
            cancel: seg_cancel.clone(),
            resource_size: self.resource_size,
        });

        let retries: Arc<Mutex<HashMap<u64, u32>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut workers = JoinSet::new();
        for worker in 0..self.max_workers.max(1) {
            workers.spawn(worker_loop(
                self.id,
                worker,
                Arc::clone(&ctx),
                Arc::clone(&layout),
                Arc::clone(&retries),
                self.max_chunk_size,
                self.retry_limit,
            ));
        }

        let mut first_err: Option<EngineError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(EngineError::DownloadFailed(format!(
                    "chunk worker panicked: {e}"
                ))),
            };
            if let Err(e) = outcome {
                seg_cancel.cancel();
                crate::error::record_first(&mut first_err, e);
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let completed = {
            let l = layout.lock();
            if !l.is_complete() {
                return Err(EngineError::DownloadFailed(format!(
                    "segment {} finished with uncovered bytes",
                    self.id
                )));
            }
            l.completed_spans().to_vec()
        };

        file.sync().await?;
        let _ = self
            .progress
            .send(ProgressUpdate::SegmentCompleted { segment: self.id })
            .await;
        debug!(segment = self.id, "segment complete");
        Ok(completed)
    }
}

/// Claim chunks from the layout until none remain.
async fn worker_loop(
    segment: u64,
    worker: usize,
    ctx: Arc<ChunkContext>,
    layout: Arc<Mutex<RangeLayout>>,
    retries: Arc<Mutex<HashMap<u64, u32>>>,
    max_chunk_size: u64,
    retry_limit: u32,
) -> Result<(), EngineError> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let chunk = { layout.lock().request_chunk(max_chunk_size) };
        let Some(chunk) = chunk else { return Ok(()) };

        match chunk_worker::run(&ctx, chunk).await {
            Ok(()) => {
                layout.lock().record_completed(chunk);
                let _ = ctx
                    .progress
                    .send(ProgressUpdate::ChunkCompleted {
                        segment,
                        span: chunk,
                    })
                    .await;
            }
            Err(ChunkError::Transient { written, source }) => {
                let tail = chunk.start + written;
                reexpose(&layout, chunk, tail);
                if written > 0 {
                    let _ = ctx
                        .progress
                        .send(ProgressUpdate::ChunkCompleted {
                            segment,
                            span: ByteSpan::new(chunk.start, tail),
                        })
                        .await;
                }

                // Keyed by the offset the retry resumes from: stalling at
                // the same offset escalates, making progress does not.
                let attempts = {
                    let mut map = retries.lock();
                    let entry = map.entry(tail).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if attempts > retry_limit {
                    warn!(segment, worker, offset = tail, "chunk retries exhausted: {source}");
                    return Err(source);
                }
                warn!(
                    segment,
                    worker,
                    offset = tail,
                    attempts,
                    "transient chunk failure, rescheduling: {source}"
                );
            }
            Err(ChunkError::Cancelled { written }) => {
                reexpose(&layout, chunk, chunk.start + written);
                return Err(EngineError::Cancelled);
            }
            Err(ChunkError::Fatal(e)) => return Err(e),
        }
    }
}

/// Shrink an aborted claim to its durable prefix so the tail is re-claimed.
fn reexpose(layout: &Mutex<RangeLayout>, chunk: ByteSpan, tail: u64) {
    let mut l = layout.lock();
    l.update_chunk(chunk.start, tail);
    if tail > chunk.start {
        l.record_completed(ByteSpan::new(chunk.start, tail));
    }
}
