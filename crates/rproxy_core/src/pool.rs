//! Round-robin upstream dispatch with per-upstream admission control and
//! scoped connection lifetime.
//!
//! One fresh TCP connection per proxied request — no pooling, no
//! keep-alive reuse of upstream sockets. The admission primitive is what
//! throttles concurrency; pooling would otherwise be needed for that.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rproxy_config::UpstreamSpec;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::ProxyError;
use crate::timeout::with_timeout;

/// Runtime record for one configured upstream: its address plus a
/// counting admission primitive capped at `max_conns_per_upstream`.
pub struct Upstream {
    pub spec: UpstreamSpec,
    admission: Arc<Semaphore>,
}

impl Upstream {
    fn new(spec: UpstreamSpec, capacity: usize) -> Self {
        Self {
            spec,
            admission: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn address(&self) -> String {
        self.spec.address()
    }

    /// Free admission slots right now; used by tests to assert the
    /// slot-release invariant holds after a sequence of acquisitions.
    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }
}

/// Ordered sequence of upstreams plus a rotation cursor. Non-empty by
/// construction; the cursor advance is a single atomic fetch-add so
/// concurrent callers see a strict round-robin rotation.
pub struct UpstreamPool {
    upstreams: Vec<Arc<Upstream>>,
    cursor: AtomicUsize,
}

impl UpstreamPool {
    pub fn new(specs: Vec<UpstreamSpec>, max_conns_per_upstream: usize) -> anyhow::Result<Self> {
        if specs.is_empty() {
            anyhow::bail!("upstream pool requires at least one upstream");
        }
        let upstreams = specs
            .into_iter()
            .map(|spec| Arc::new(Upstream::new(spec, max_conns_per_upstream)))
            .collect();
        Ok(Self {
            upstreams,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn upstreams(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }

    /// Atomically return the upstream at the current cursor and advance
    /// it by one modulo the pool length. No tie-break: order is
    /// configuration order.
    pub fn next(&self) -> Arc<Upstream> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.upstreams.len();
        Arc::clone(&self.upstreams[idx])
    }

    /// Select the next upstream via `next()`, wait on its admission
    /// primitive (unbounded — the connect timeout does not bound this
    /// wait), then open a fresh TCP connection under `connect_timeout`.
    /// On connect failure the admission slot is released before
    /// returning (the permit is simply dropped).
    pub async fn acquire_connection(
        &self,
        connect_timeout: Duration,
    ) -> Result<ConnectionSlot, ProxyError> {
        let upstream = self.next();
        let permit = Arc::clone(&upstream.admission)
            .acquire_owned()
            .await
            .map_err(|e| ProxyError::Unexpected(format!("admission semaphore closed: {e}")))?;

        let addr = upstream.address();
        let connected = with_timeout(TcpStream::connect(&addr), connect_timeout, "upstream connect")
            .await
            .map_err(ProxyError::Timeout)?;

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => return Err(ProxyError::connection("connect", format!("{addr}: {e}"))),
        };

        debug!(target: "rproxy_core::pool", upstream = %addr, "opened fresh upstream connection");

        Ok(ConnectionSlot {
            stream,
            addr,
            _permit: permit,
        })
    }
}

/// A scoped (reader+writer, upstream) pair produced by the pool. Valid
/// only for the duration of the owning request; the caller MUST call
/// [`ConnectionSlot::close`] on every exit path (success or failure) —
/// Rust has no async destructor, so this stands in for the scope/defer
/// construct the design notes call for. Admission release itself is
/// guaranteed regardless: `_permit`'s synchronous Drop runs even if
/// `close` is skipped, it just won't wait for the shutdown handshake.
pub struct ConnectionSlot {
    pub stream: TcpStream,
    pub addr: String,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionSlot {
    /// Close the upstream socket and release the admission slot. Safe to
    /// call after the stream has already failed; the shutdown error (if
    /// any) is swallowed since the permit release must happen regardless.
    pub async fn close(mut self) {
        use tokio::io::AsyncWriteExt;
        let _ = self.stream.shutdown().await;
        // _permit drops here, releasing the admission slot.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(n: usize) -> Vec<UpstreamSpec> {
        (0..n)
            .map(|i| UpstreamSpec::new("127.0.0.1", 9000 + i as u16))
            .collect()
    }

    #[test]
    fn rejects_empty_upstream_list() {
        let result = UpstreamPool::new(vec![], 10);
        assert!(result.is_err());
    }

    #[test]
    fn round_robin_fairness_over_many_calls() {
        let pool = UpstreamPool::new(specs(3), 10).unwrap();
        let mut counts = [0usize; 3];
        let n = 100;
        for _ in 0..n {
            let upstream = pool.next();
            let idx = pool
                .upstreams()
                .iter()
                .position(|u| Arc::ptr_eq(u, &upstream))
                .unwrap();
            counts[idx] += 1;
        }
        for count in counts {
            assert!(count == n / 3 || count == n / 3 + 1);
        }
    }

    #[test]
    fn single_upstream_always_selected() {
        let pool = UpstreamPool::new(specs(1), 10).unwrap();
        for _ in 0..5 {
            let upstream = pool.next();
            assert_eq!(upstream.address(), "127.0.0.1:9000");
        }
    }

    #[tokio::test]
    async fn connect_failure_releases_admission_slot() {
        let pool = UpstreamPool::new(vec![UpstreamSpec::new("127.0.0.1", 1)], 2);
        let pool = pool.unwrap();
        let upstream = Arc::clone(&pool.upstreams()[0]);
        assert_eq!(upstream.available_permits(), 2);

        let result = pool
            .acquire_connection(Duration::from_millis(200))
            .await;
        assert!(result.is_err());
        assert_eq!(upstream.available_permits(), 2);
    }
}
