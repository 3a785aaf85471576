//! Adaptive rate controller
//!
//! The sampler is the sole writer of the pacing target: once per tick it
//! compares the measured throughput against the previous target and probes
//! up (x1.1) or backs off (x0.9), clamped to the bandwidth ceiling and the
//! optional user limit. Workers read a snapshot at flush time; staleness by
//! one tick is harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct RateController {
    target: Arc<AtomicU64>,
    max_bandwidth: u64,
    user_limit: Option<u64>,
}

impl RateController {
    pub fn new(max_bandwidth: u64, user_limit: Option<u64>) -> Self {
        Self {
            target: Arc::new(AtomicU64::new(0)),
            max_bandwidth,
            user_limit,
        }
    }

    /// Snapshot handle shared with chunk workers.
    pub fn handle(&self) -> RateHandle {
        RateHandle {
            target: Arc::clone(&self.target),
        }
    }

    /// Feed one tick's measured throughput (bytes/sec) and return the new
    /// pacing target.
    pub fn update(&self, measured: f64) -> u64 {
        let previous = self.target.load(Ordering::Relaxed) as f64;
        let mut next = if measured >= previous {
            measured * 1.1
        } else {
            measured * 0.9
        };
        next = next.clamp(0.0, self.max_bandwidth as f64);
        if let Some(limit) = self.user_limit {
            next = next.min(limit as f64);
        }
        let next = next as u64;
        self.target.store(next, Ordering::Relaxed);
        next
    }
}

/// Read-only view of the pacing target.
#[derive(Clone)]
pub struct RateHandle {
    target: Arc<AtomicU64>,
}

impl RateHandle {
    /// Current target in bytes/sec; zero means "no pacing yet".
    pub fn current(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    /// Sleep long enough that a flush of `n` bytes averages out to the
    /// current target rate. No-op while the target is unset.
    pub async fn pace(&self, n: usize) {
        let rate = self.current();
        if rate == 0 || n == 0 {
            return;
        }
        let sleep = Duration::from_secs_f64(n as f64 / rate as f64);
        if !sleep.is_zero() {
            tokio::time::sleep(sleep).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_up_when_throughput_holds() {
        let ctl = RateController::new(u64::MAX, None);
        assert_eq!(ctl.update(1000.0), 1100);
        // measured kept pace with the target: keep probing
        assert_eq!(ctl.update(1100.0), 1210);
    }

    #[test]
    fn backs_off_when_throughput_drops() {
        let ctl = RateController::new(u64::MAX, None);
        ctl.update(1000.0);
        // measured fell below the target
        assert_eq!(ctl.update(500.0), 450);
    }

    #[test]
    fn clamps_to_ceiling_and_user_limit() {
        let ctl = RateController::new(2000, None);
        assert_eq!(ctl.update(10_000.0), 2000);

        let ctl = RateController::new(2000, Some(800));
        assert_eq!(ctl.update(10_000.0), 800);
    }

    #[test]
    fn handle_sees_controller_updates() {
        let ctl = RateController::new(u64::MAX, None);
        let handle = ctl.handle();
        assert_eq!(handle.current(), 0);
        ctl.update(2048.0);
        assert_eq!(handle.current(), 2252);
    }

    #[tokio::test]
    async fn pace_is_noop_without_target() {
        let ctl = RateController::new(u64::MAX, None);
        let handle = ctl.handle();
        let start = std::time::Instant::now();
        handle.pace(1024 * 1024).await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
