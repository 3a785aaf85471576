//! Downloader coordinator
//!
//! Owns the destination file, the temp directory, the accounting task and
//! a bounded pool of segments. `create` probes the URL and lays the files
//! out; `start` runs the download to completion, merges the segment files
//! and renames the destination into place.

use crate::engine::accounting::{self, AccountingTask, Counters, ProgressUpdate};
use crate::engine::range_layout::spans_cover;
use crate::engine::rate::RateController;
use crate::engine::resume::{self, ResumeState};
use crate::engine::segment::SegmentRun;
use crate::error::{record_first, EngineError};
use crate::fs_layout::DownloadLayout;
use crate::probe;
use parget_types::{ByteSpan, CoreEvent, EngineConfig, ResourceInfo};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

pub struct Downloader {
    id: Uuid,
    cfg: EngineConfig,
    info: ResourceInfo,
    layout: DownloadLayout,
    client: Client,
    event_tx: broadcast::Sender<CoreEvent>,
    cancel: CancellationToken,
    resume: ResumeState,
    total_segments: u64,
}

impl Downloader {
    /// Probe the URL, lay out the destination and temp directory, and pick
    /// up resumable state from a previous run of the same download.
    pub async fn create(url: &str, cfg: EngineConfig) -> Result<Self, EngineError> {
        let parsed = Url::parse(url)?;
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.request_timeout)
            .build()
            .map_err(EngineError::RequestInit)?;

        let info = probe::probe(&client, &parsed).await?;

        let total_segments = if info.size == 0 {
            0
        } else if info.supports_ranges {
            info.size.div_ceil(cfg.segment_size)
        } else {
            // no range support: one segment, one worker
            1
        };

        let (id, prior) =
            resume::discover(&cfg.temp_root, parsed.as_str(), info.size, cfg.segment_size).await;
        let resume = prior
            .unwrap_or_else(|| ResumeState::new(parsed.as_str(), info.size, cfg.segment_size));

        let layout = DownloadLayout::new(&cfg, &info.filename, &id);
        layout.prepare(info.size).await?;

        let (event_tx, _) = broadcast::channel(256);

        info!(
            %id,
            size = info.size,
            total_segments,
            ranges = info.supports_ranges,
            "download created: {}",
            info.filename
        );

        Ok(Self {
            id,
            cfg,
            info,
            layout,
            client,
            event_tx,
            cancel: CancellationToken::new(),
            resume,
            total_segments,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resource(&self) -> &ResourceInfo {
        &self.info
    }

    pub fn total_segments(&self) -> u64 {
        self.total_segments
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    /// Token that aborts the download when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn segment_span(&self, id: u64) -> ByteSpan {
        if !self.info.supports_ranges {
            return ByteSpan::new(0, self.info.size);
        }
        let start = id * self.cfg.segment_size;
        let end = ((id + 1) * self.cfg.segment_size).min(self.info.size);
        ByteSpan::new(start, end)
    }

    /// Run the download to completion and return the final path. On failure
    /// the temp directory and the preallocated destination are left on disk
    /// for resumption.
    pub async fn start(self) -> Result<PathBuf, EngineError> {
        if self.info.size == 0 {
            // empty body: an empty destination, no segments
            let path = self.layout.finalize().await?;
            let _ = self.event_tx.send(CoreEvent::Completed { path: path.clone() });
            return Ok(path);
        }

        let outcome = match self.cfg.download_deadline {
            Some(limit) => tokio::time::timeout(limit, self.run_segments())
                .await
                .unwrap_or(Err(EngineError::DeadlineExceeded)),
            None => self.run_segments().await,
        };

        let result = match outcome {
            Ok(()) => self.merge_and_finalize().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(path) => {
                let _ = self.event_tx.send(CoreEvent::Completed { path: path.clone() });
                Ok(path)
            }
            Err(e) => {
                self.cancel.cancel();
                error!("download failed: {e}");
                let _ = self.event_tx.send(CoreEvent::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn merge_and_finalize(&self) -> Result<PathBuf, EngineError> {
        let spans: Vec<ByteSpan> = (0..self.total_segments)
            .map(|id| self.segment_span(id))
            .collect();
        self.layout.merge(&spans).await?;
        self.layout.finalize().await
    }

    async fn run_segments(&self) -> Result<(), EngineError> {
        let (progress_tx, progress_rx) = mpsc::channel::<ProgressUpdate>(1024);
        let controller = RateController::new(self.cfg.max_bandwidth, self.cfg.max_download_speed);
        let rate = controller.handle();

        // Validate resume records against the segment files on disk; only
        // intervals whose bytes can still be there are kept.
        let mut initial = Counters::default();
        let mut state = ResumeState::new(
            self.info.url.as_str(),
            self.info.size,
            self.cfg.segment_size,
        );
        let mut seeds: Vec<Vec<ByteSpan>> = Vec::with_capacity(self.total_segments as usize);
        let mut skip: Vec<bool> = Vec::with_capacity(self.total_segments as usize);
        for id in 0..self.total_segments {
            let span = self.segment_span(id);
            let recorded = self.resume.completed_for(id);
            let file_len = tokio::fs::metadata(self.layout.segment_path(id))
                .await
                .map(|m| m.len())
                .unwrap_or(0);

            let seed = if !recorded.is_empty() && file_len == span.len() {
                recorded
            } else {
                Vec::new()
            };
            let resumed_bytes: u64 = seed.iter().map(ByteSpan::len).sum();
            let complete = !seed.is_empty() && spans_cover(&seed, span);

            if !seed.is_empty() {
                state.segments.insert(id, seed.clone());
                initial.bytes_downloaded += resumed_bytes;
                initial.bytes_written += resumed_bytes;
            }
            if complete {
                initial.completed_segments += 1;
                info!(segment = id, "segment already complete, skipping");
            }
            seeds.push(seed);
            skip.push(complete);
        }

        let accounting = tokio::spawn(accounting::run(AccountingTask {
            rx: progress_rx,
            event_tx: self.event_tx.clone(),
            controller,
            total_size: self.info.size,
            total_segments: self.total_segments,
            tick: self.cfg.stats_tick,
            state,
            state_path: self.layout.state_path(),
            initial,
        }));

        let gate = Arc::new(Semaphore::new(self.cfg.max_concurrent_segments.max(1)));
        let mut segments = JoinSet::new();
        for id in 0..self.total_segments {
            if skip[id as usize] {
                continue;
            }
            let run = SegmentRun {
                id,
                span: self.segment_span(id),
                path: self.layout.segment_path(id),
                seed: seeds[id as usize].clone(),
                max_workers: if self.info.supports_ranges {
                    self.cfg.max_concurrent_chunks
                } else {
                    1
                },
                max_chunk_size: if self.info.supports_ranges {
                    self.cfg.max_chunk_size
                } else {
                    self.info.size
                },
                retry_limit: self.cfg.chunk_retry_limit,
                resource_size: self.info.size,
                client: self.client.clone(),
                url: self.info.url.clone(),
                user_agent: self.cfg.user_agent.clone(),
                buffer_size: self.cfg.buffer_size,
                progress: progress_tx.clone(),
                rate: rate.clone(),
                cancel: self.cancel.clone(),
            };
            let gate = Arc::clone(&gate);
            let cancel = self.cancel.clone();
            let event_tx = self.event_tx.clone();
            segments.spawn(async move {
                let _permit = match gate.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (id, Err(EngineError::Cancelled)),
                };
                if cancel.is_cancelled() {
                    return (id, Err(EngineError::Cancelled));
                }
                let _ = event_tx.send(CoreEvent::SegmentStarted { id });
                (id, run.run().await)
            });
        }

        let mut first_err: Option<EngineError> = None;
        while let Some(joined) = segments.join_next().await {
            match joined {
                Ok((id, Ok(_))) => debug!(segment = id, "segment finished"),
                Ok((id, Err(e))) => {
                    if !matches!(e, EngineError::Cancelled) {
                        warn!(segment = id, "segment failed: {e}");
                    }
                    // the first fatal error cancels everything still running
                    self.cancel.cancel();
                    record_first(&mut first_err, e);
                }
                Err(e) => {
                    self.cancel.cancel();
                    record_first(
                        &mut first_err,
                        EngineError::DownloadFailed(format!("segment task panicked: {e}")),
                    );
                }
            }
        }

        // Close the channel so accounting drains and returns.
        drop(progress_tx);
        let (counters, state) = accounting
            .await
            .map_err(|e| EngineError::DownloadFailed(format!("accounting task failed: {e}")))?;

        if let Some(e) = first_err {
            if let Err(save_err) = state.save(&self.layout.state_path()).await {
                warn!("failed to persist resume state: {save_err}");
            }
            return Err(e);
        }

        debug!(
            downloaded = counters.bytes_downloaded,
            written = counters.bytes_written,
            "all segments complete"
        );
        Ok(())
    }
}
