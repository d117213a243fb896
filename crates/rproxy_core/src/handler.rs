//! Orchestrates one accepted client connection end to end: parse the
//! request head, get an upstream connection, forward request and
//! response, and record the outcome.

use std::sync::Arc;
use std::time::Duration;

use rproxy_config::Timeouts;
use rproxy_http::head::{build_upstream_request_head, parse_request_head, serialize_request_head};
use rproxy_http::responses;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::pipeline::{copy_chunked, copy_fixed, CountingWriter, ReadBuffer};
use crate::pool::UpstreamPool;
use crate::response::stream_response;

const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Handle one client connection: read its request head, proxy it to an
/// upstream picked by `pool`, stream the response back, and update
/// `metrics`. Never propagates an error to the caller — failures are
/// turned into a best-effort HTTP error response on the client stream
/// and logged at the level the error taxonomy prescribes.
pub async fn handle_connection<C>(
    mut client: C,
    pool: Arc<UpstreamPool>,
    timeouts: Timeouts,
    metrics: Arc<Metrics>,
) where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let trace_id = rproxy_util::new_trace_id();
    match run_request(&mut client, &pool, &timeouts, &trace_id).await {
        Ok(outcome) => {
            metrics.record_request(
                outcome.status,
                outcome.upstream_addr.as_deref(),
                outcome.bytes_in,
                outcome.bytes_out,
            );
        }
        Err(err) => {
            let status = err.status_code();
            if err.is_warn_level() {
                tracing::warn!(target: "rproxy_core::handler", trace_id = %trace_id, status, error = %err, "request failed");
            } else {
                tracing::error!(target: "rproxy_core::handler", trace_id = %trace_id, status, error = %err, "request failed");
            }
            let _ = send_error_for(&mut client, status, &err).await;
            metrics.record_request(status, None, 0, 0);
        }
    }
}

struct RequestOutcome {
    status: u16,
    upstream_addr: Option<String>,
    bytes_in: u64,
    bytes_out: u64,
}

async fn send_error_for<C>(client: &mut C, status: u16, _err: &ProxyError) -> anyhow::Result<()>
where
    C: AsyncWrite + Unpin,
{
    match status {
        504 => responses::send_timeout(client).await,
        502 => responses::send_bad_gateway(client).await,
        _ => responses::send_internal_error(client).await,
    }
}

async fn run_request<C>(
    client: &mut C,
    pool: &UpstreamPool,
    timeouts: &Timeouts,
    trace_id: &str,
) -> Result<RequestOutcome, ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut client_buf = ReadBuffer::new();
    let head_bytes = read_request_head(&mut client_buf, client, timeouts.read()).await?;
    let request_head = parse_request_head(&head_bytes)
        .map_err(|e| ProxyError::Malformed(format!("{e} (trace {trace_id})")))?;

    let content_length = request_head.content_length();
    let is_chunked = request_head.is_chunked();
    let upstream_head =
        build_upstream_request_head(&request_head, content_length, is_chunked);

    let mut slot = pool.acquire_connection(timeouts.connect()).await?;
    let upstream_addr = slot.addr.clone();

    let result = proxy_over_connection(
        client,
        &mut client_buf,
        &mut slot.stream,
        &upstream_head,
        content_length,
        is_chunked,
        timeouts,
    )
    .await;

    slot.close().await;

    let (status, bytes_in, bytes_out) = result?;

    Ok(RequestOutcome {
        status,
        upstream_addr: Some(upstream_addr),
        bytes_in,
        bytes_out,
    })
}

#[allow(clippy::too_many_arguments)]
async fn proxy_over_connection<C, U>(
    client: &mut C,
    client_buf: &mut ReadBuffer,
    upstream: &mut U,
    upstream_head: &rproxy_http::head::HttpRequestHead,
    content_length: Option<u64>,
    is_chunked: bool,
    timeouts: &Timeouts,
) -> Result<(u16, u64, u64), ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let mut head_bytes = Vec::new();
    serialize_request_head(upstream_head, &mut head_bytes);

    let mut counting_upstream = CountingWriter::new(&mut *upstream);
    counting_upstream
        .write_all(&head_bytes)
        .await
        .map_err(|e| ProxyError::connection("write", e))?;

    if is_chunked {
        copy_chunked(
            client_buf,
            client,
            &mut counting_upstream,
            timeouts.read(),
            timeouts.write(),
        )
        .await?;
    } else if let Some(len) = content_length {
        if len > 0 {
            copy_fixed(
                client_buf,
                client,
                &mut counting_upstream,
                len,
                timeouts.read(),
                timeouts.write(),
            )
            .await?;
        }
    }
    counting_upstream
        .flush()
        .await
        .map_err(|e| ProxyError::connection("write", e))?;
    let bytes_in = counting_upstream.count();

    let mut upstream_buf = ReadBuffer::new();
    let mut counting_client = CountingWriter::new(&mut *client);
    let status = stream_response(
        &mut upstream_buf,
        upstream,
        &mut counting_client,
        &upstream_head.method,
        timeouts.read(),
        timeouts.write(),
    )
    .await?;
    let bytes_out = counting_client.count();

    let _ = client.shutdown().await;

    Ok((status, bytes_in, bytes_out))
}

async fn read_request_head<C>(
    buf: &mut ReadBuffer,
    client: &mut C,
    read_timeout: Duration,
) -> Result<Vec<u8>, ProxyError>
where
    C: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        if head.len() > MAX_HEAD_BYTES {
            return Err(ProxyError::Malformed(
                "request head exceeded maximum size".to_string(),
            ));
        }
        let line = buf.read_line(client, read_timeout).await?;
        let is_blank = line.is_empty() || line == b"\r\n" || line == b"\n";
        head.extend_from_slice(&line);
        if is_blank {
            return Ok(head);
        }
    }
}
