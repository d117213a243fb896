//! Process-wide request accounting. No HTTP endpoint, no export format —
//! just atomics and concurrent maps a caller can read directly, plus a
//! background task that logs a compact summary line periodically.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    active_connections: AtomicI64,
    total_bytes_in: AtomicU64,
    total_bytes_out: AtomicU64,
    requests_by_status: DashMap<u16, u64>,
    requests_by_upstream: DashMap<String, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Record the outcome of one completed request: status, the upstream
    /// it was routed to (if any — admission rejections never reach an
    /// upstream), and the bytes moved in each direction.
    pub fn record_request(
        &self,
        status: u16,
        upstream_addr: Option<&str>,
        bytes_in: u64,
        bytes_out: u64,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.total_bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        *self.requests_by_status.entry(status).or_insert(0) += 1;
        if let Some(addr) = upstream_addr {
            *self
                .requests_by_upstream
                .entry(addr.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_bytes_in(&self) -> u64 {
        self.total_bytes_in.load(Ordering::Relaxed)
    }

    pub fn total_bytes_out(&self) -> u64 {
        self.total_bytes_out.load(Ordering::Relaxed)
    }

    pub fn status_count(&self, status: u16) -> u64 {
        self.requests_by_status.get(&status).map(|v| *v).unwrap_or(0)
    }

    pub fn upstream_count(&self, addr: &str) -> u64 {
        self.requests_by_upstream
            .get(addr)
            .map(|v| *v)
            .unwrap_or(0)
    }

    fn summary_line(&self) -> String {
        format!(
            "requests={} active_connections={} bytes_in={} bytes_out={}",
            self.total_requests(),
            self.active_connections(),
            self.total_bytes_in(),
            self.total_bytes_out(),
        )
    }
}

/// Background task that logs [`Metrics::summary_line`] at a fixed
/// interval. Runs until the process exits; there is no shutdown handle
/// because the metrics task carries no state worth draining.
pub async fn run_periodic_report(metrics: std::sync::Arc<Metrics>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        info!(target: "rproxy_core::metrics", "{}", metrics.summary_line());
    }
}
