//! Binds the listener and runs the accept loop: a non-blocking admission
//! check per connection (fixing the blocking-acquire race the original
//! design flagged), then a spawned handler task per accepted connection.

use std::sync::Arc;

use rproxy_config::Timeouts;
use rproxy_http::responses;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::handler::handle_connection;
use crate::metrics::Metrics;
use crate::pool::UpstreamPool;

pub async fn bind_listener(listen_addr: &str) -> anyhow::Result<TcpListener> {
    info!(target: "rproxy_core::acceptor", listen = %listen_addr, "binding listener");
    let listener = TcpListener::bind(listen_addr).await?;
    info!(target: "rproxy_core::acceptor", listen = %listen_addr, "bind successful");
    Ok(listener)
}

/// Accept connections until the listener errors. Each iteration: accept,
/// try (non-blocking) to take a client admission permit, and either
/// synthesize a 503 or spawn a handler task holding the permit for the
/// task's lifetime.
pub async fn accept_loop(
    listener: TcpListener,
    admission: Arc<Semaphore>,
    pool: Arc<UpstreamPool>,
    timeouts: Timeouts,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    loop {
        let (mut stream, client_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(target: "rproxy_core::acceptor", error = %e, "accept failed");
                return Err(e.into());
            }
        };

        match Arc::clone(&admission).try_acquire_owned() {
            Ok(permit) => {
                debug!(
                    target: "rproxy_core::acceptor",
                    client_addr = %client_addr,
                    available_permits = admission.available_permits(),
                    "connection admitted"
                );
                let pool = Arc::clone(&pool);
                let timeouts = timeouts.clone();
                let metrics = Arc::clone(&metrics);
                metrics.connection_opened();

                tokio::spawn(async move {
                    let _permit = permit;
                    handle_connection(stream, pool, timeouts, Arc::clone(&metrics)).await;
                    metrics.connection_closed();
                });
            }
            Err(_) => {
                let trace_id = rproxy_util::new_trace_id();
                warn!(
                    target: "rproxy_core::acceptor",
                    client_addr = %client_addr,
                    trace_id = %trace_id,
                    "client admission full, synthesizing 503"
                );
                let _ = responses::send_admission_full(&mut stream, &trace_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rproxy_config::UpstreamSpec;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn test_timeouts() -> Timeouts {
        let mut t = Timeouts::default();
        t.connect_ms = 200;
        t.read_ms = 200;
        t.write_ms = 200;
        t
    }

    #[tokio::test]
    async fn rejects_with_503_once_admission_is_exhausted() {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let admission = Arc::new(Semaphore::new(0));
        let pool = Arc::new(UpstreamPool::new(vec![UpstreamSpec::new("127.0.0.1", 1)], 1).unwrap());
        let metrics = Arc::new(Metrics::new());

        tokio::spawn(accept_loop(
            listener,
            admission,
            pool,
            test_timeouts(),
            metrics,
        ));

        let mut client = TcpStream::connect(listen_addr).await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 503"));
        assert!(text.contains("X-Trace-Id:"));
    }
}
