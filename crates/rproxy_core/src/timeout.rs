//! Applies a deadline to an awaitable operation and produces a named
//! timeout error. No retries: on expiry the operation is cancelled and
//! the failure propagates.

use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
#[error("timeout during {label} after {duration:?}")]
pub struct TimedOut {
    pub label: String,
    pub duration: Duration,
}

pub async fn with_timeout<F, T>(op: F, duration: Duration, label: &str) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, op)
        .await
        .map_err(|_| TimedOut {
            label: label.to_string(),
            duration,
        })
}

/// Tracks elapsed/remaining time against a total budget. This is
/// plumbing for a future total-request timeout policy: it is exercised
/// by the tests below but intentionally not wired into the per-request
/// hot path (see the framing decision recorded alongside the streaming
/// pipeline).
pub struct TimeoutScope {
    start: Instant,
    total: Duration,
}

impl TimeoutScope {
    pub fn new(total: Duration) -> Self {
        Self {
            start: Instant::now(),
            total,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
