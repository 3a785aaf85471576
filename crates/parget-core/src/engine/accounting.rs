//! Progress accounting and the stats sampler
//!
//! Workers hold no shared counters. They send messages, and one task owns
//! the totals: it drains updates, ticks the sampler, feeds the rate
//! controller and persists resume metadata. Staleness in what the rest of
//! the system observes is bounded by one tick.

use crate::engine::rate::RateController;
use crate::engine::resume::ResumeState;
use parget_types::{ByteSpan, CoreEvent, DownloadStats};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// Message from a worker to the accounting task.
#[derive(Debug)]
pub enum ProgressUpdate {
    /// Bytes received from the socket (may sit in a worker buffer).
    BytesReceived(u64),
    /// A worker aborted and dropped this many unflushed buffered bytes;
    /// the range will be re-downloaded.
    BytesDiscarded(u64),
    /// Bytes flushed to a segment file, with the time spent in the write.
    BytesWritten { n: u64, took: Duration },
    /// A chunk's interval is fully written to its segment file.
    ChunkCompleted { segment: u64, span: ByteSpan },
    /// An entire segment completed.
    SegmentCompleted { segment: u64 },
}

/// Totals across all workers.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub bytes_downloaded: u64,
    pub bytes_written: u64,
    /// Accumulated wall time spent inside write syscalls.
    pub write_time_total: Duration,
    pub completed_segments: u64,
}

impl Counters {
    fn apply(&mut self, update: &ProgressUpdate) {
        match update {
            ProgressUpdate::BytesReceived(n) => self.bytes_downloaded += n,
            ProgressUpdate::BytesDiscarded(n) => {
                self.bytes_downloaded = self.bytes_downloaded.saturating_sub(*n)
            }
            ProgressUpdate::BytesWritten { n, took } => {
                self.bytes_written += n;
                self.write_time_total += *took;
            }
            ProgressUpdate::ChunkCompleted { .. } => {}
            ProgressUpdate::SegmentCompleted { .. } => self.completed_segments += 1,
        }
    }
}

pub(crate) struct AccountingTask {
    pub rx: mpsc::Receiver<ProgressUpdate>,
    pub event_tx: broadcast::Sender<CoreEvent>,
    pub controller: RateController,
    pub total_size: u64,
    pub total_segments: u64,
    pub tick: Duration,
    /// Resume sidecar, persisted once per tick while dirty.
    pub state: ResumeState,
    pub state_path: PathBuf,
    /// Totals carried over from a resumed run.
    pub initial: Counters,
}

/// Drain updates until every sender is gone, then return the final totals
/// and the resume state as last recorded.
pub(crate) async fn run(task: AccountingTask) -> (Counters, ResumeState) {
    let AccountingTask {
        mut rx,
        event_tx,
        controller,
        total_size,
        total_segments,
        tick,
        mut state,
        state_path,
        initial,
    } = task;

    let started = Instant::now();
    let mut counters = initial;
    let mut interval_bytes: u64 = 0;
    let mut dirty = false;

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick is immediate

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else { break };
                match &update {
                    ProgressUpdate::BytesReceived(n) => interval_bytes += n,
                    ProgressUpdate::ChunkCompleted { segment, span } => {
                        state.segments.entry(*segment).or_default().push(*span);
                        dirty = true;
                    }
                    ProgressUpdate::SegmentCompleted { segment } => {
                        let _ = event_tx.send(CoreEvent::SegmentCompleted { id: *segment });
                        dirty = true;
                    }
                    _ => {}
                }
                counters.apply(&update);
            }
            _ = ticker.tick() => {
                let measured = interval_bytes as f64 / tick.as_secs_f64();
                interval_bytes = 0;
                controller.update(measured);
                let stats = compute_stats(&counters, measured, started.elapsed(), total_size, total_segments);
                let _ = event_tx.send(CoreEvent::Progress { stats });
                if dirty {
                    if let Err(e) = state.save(&state_path).await {
                        warn!("failed to persist resume state: {e}");
                    }
                    dirty = false;
                }
            }
        }
    }

    (counters, state)
}

fn compute_stats(
    counters: &Counters,
    measured: f64,
    elapsed: Duration,
    total_size: u64,
    total_segments: u64,
) -> DownloadStats {
    let disk_write_speed = if counters.write_time_total.is_zero() {
        0.0
    } else {
        counters.bytes_written as f64 / counters.write_time_total.as_secs_f64()
    };
    let progress = if total_size == 0 {
        1.0
    } else {
        counters.bytes_downloaded as f32 / total_size as f32
    };
    let consistent_progress = if total_segments == 0 {
        1.0
    } else {
        counters.completed_segments as f32 / total_segments as f32
    };
    let eta = if measured > 0.0 {
        let remaining = total_size.saturating_sub(counters.bytes_downloaded);
        Some(Duration::from_secs_f64(remaining as f64 / measured))
    } else {
        None
    };

    DownloadStats {
        bytes_downloaded: counters.bytes_downloaded,
        bytes_written: counters.bytes_written,
        total_size,
        download_speed: measured,
        disk_write_speed,
        progress,
        consistent_progress,
        completed_segments: counters.completed_segments,
        total_segments,
        elapsed,
        eta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_updates() {
        let mut c = Counters::default();
        c.apply(&ProgressUpdate::BytesReceived(512));
        c.apply(&ProgressUpdate::BytesReceived(512));
        c.apply(&ProgressUpdate::BytesWritten {
            n: 1024,
            took: Duration::from_millis(10),
        });
        c.apply(&ProgressUpdate::SegmentCompleted { segment: 0 });

        assert_eq!(c.bytes_downloaded, 1024);
        assert_eq!(c.bytes_written, 1024);
        assert_eq!(c.write_time_total, Duration::from_millis(10));
        assert_eq!(c.completed_segments, 1);
    }

    #[test]
    fn discarded_bytes_roll_back_the_received_total() {
        let mut c = Counters::default();
        c.apply(&ProgressUpdate::BytesReceived(100));
        c.apply(&ProgressUpdate::BytesDiscarded(30));
        assert_eq!(c.bytes_downloaded, 70);
        c.apply(&ProgressUpdate::BytesDiscarded(1000));
        assert_eq!(c.bytes_downloaded, 0);
    }

    #[test]
    fn stats_math() {
        let counters = Counters {
            bytes_downloaded: 50,
            bytes_written: 40,
            write_time_total: Duration::from_secs(2),
            completed_segments: 1,
        };
        let stats = compute_stats(&counters, 25.0, Duration::from_secs(2), 100, 4);

        assert_eq!(stats.download_speed, 25.0);
        assert_eq!(stats.disk_write_speed, 20.0);
        assert_eq!(stats.progress, 0.5);
        assert_eq!(stats.consistent_progress, 0.25);
        assert_eq!(stats.eta, Some(Duration::from_secs(2)));
    }

    #[test]
    fn stats_handle_empty_resource() {
        let stats = compute_stats(&Counters::default(), 0.0, Duration::ZERO, 0, 0);
        assert_eq!(stats.progress, 1.0);
        assert_eq!(stats.consistent_progress, 1.0);
        assert!(stats.eta.is_none());
    }
}
