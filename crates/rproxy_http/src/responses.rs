//! Error responses synthesized by the proxy itself (as opposed to
//! anything read back from an upstream). All of these are best-effort:
//! callers swallow the write error rather than letting it mask the
//! original failure.

use tokio::io::{AsyncWrite, AsyncWriteExt};

fn html_body(code: u16, message: &str) -> Vec<u8> {
    format!("<html><body><h1>{code} {message}</h1></body></html>").into_bytes()
}

async fn send_error<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
    code: u16,
    message: &str,
    extra_headers: &[(&str, &str)],
) -> anyhow::Result<()> {
    let body = html_body(code, message);
    let mut head = format!(
        "HTTP/1.1 {code} {message}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        body.len()
    );
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

/// 504 Gateway Timeout — any deadline expiry.
pub async fn send_timeout<W: AsyncWrite + Unpin + ?Sized>(stream: &mut W) -> anyhow::Result<()> {
    send_error(stream, 504, "Gateway Timeout", &[]).await
}

/// 502 Bad Gateway — upstream connection or stream failure.
pub async fn send_bad_gateway<W: AsyncWrite + Unpin + ?Sized>(stream: &mut W) -> anyhow::Result<()> {
    send_error(stream, 502, "Bad Gateway", &[]).await
}

/// 500 Internal Server Error — unclassified failure.
pub async fn send_internal_error<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
) -> anyhow::Result<()> {
    send_error(stream, 500, "Internal Server Error", &[]).await
}

/// 503 Service Unavailable — admission-full, synthesized by the acceptor
/// before the handler is ever invoked. Carries the trace id of the
/// rejected connection.
pub async fn send_admission_full<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
    trace_id: &str,
) -> anyhow::Result<()> {
    let head = format!(
        "HTTP/1.1 503 Service Unavailable\r\n\
         Content-Length: 0\r\n\
         Connection: close\r\n\
         X-Trace-Id: {trace_id}\r\n\
         \r\n"
    );
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// 400 Bad Request — malformed request line or headers.
pub async fn send_bad_request<W: AsyncWrite + Unpin + ?Sized>(stream: &mut W) -> anyhow::Result<()> {
    send_error(stream, 400, "Bad Request", &[]).await
}
