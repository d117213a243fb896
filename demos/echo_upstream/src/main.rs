//! Standalone echo server used as a sample upstream for manual and
//! integration testing of the proxy. Not part of the proxy itself: this
//! binary has no admission control, no round-robin, no timeouts of its
//! own — it exists purely to give the proxy something real to forward
//! to and stream from.
//!
//! Routes:
//! - `GET /`              JSON summary of the received request.
//! - `POST /echo`          echoes the request body back verbatim.
//! - `GET /slow?delay=N`   sleeps N seconds before responding.
//! - `GET /status?code=N`  responds with status N and an empty body.
//! - `GET /large?size=N`   responds with N bytes of a repeated filler byte.

use std::time::Duration;

use rproxy_http::head::{parse_request_head, HttpRequestHead};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9001".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(target: "echo_upstream", %addr, "listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = handle(stream).await {
                warn!(target: "echo_upstream", %peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle(mut stream: TcpStream) -> anyhow::Result<()> {
    let head_bytes = read_head(&mut stream).await?;
    let head = parse_request_head(&head_bytes)?;

    let content_length = head.content_length().unwrap_or(0) as usize;
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        stream.read_exact(&mut body).await?;
    }

    let (path, query) = split_path(&head.path);

    let response = match (head.method.as_str(), path) {
        ("GET", "/") => summary_response(&head),
        ("POST", "/echo") => fixed_response(200, "OK", &body),
        ("GET", "/slow") => {
            let delay = query_param(query, "delay").and_then(|v| v.parse().ok()).unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(delay)).await;
            fixed_response(200, "OK", b"slept")
        }
        ("GET", "/status") => {
            let code = query_param(query, "code").and_then(|v| v.parse().ok()).unwrap_or(200);
            fixed_response(code, reason_phrase(code), b"")
        }
        ("GET", "/large") => {
            let size: usize = query_param(query, "size").and_then(|v| v.parse().ok()).unwrap_or(0);
            let filler = vec![b'x'; size];
            fixed_response(200, "OK", &filler)
        }
        _ => fixed_response(404, "Not Found", b"not found"),
    };

    stream.write_all(&response).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_head(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        if let Some(pos) = find_double_crlf(&buf) {
            return Ok(buf[..pos].to_vec());
        }
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            anyhow::bail!("connection closed before request head was complete");
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn split_path(raw: &str) -> (&str, &str) {
    match raw.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw, ""),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn summary_response(head: &HttpRequestHead) -> Vec<u8> {
    let headers: serde_json::Map<String, serde_json::Value> = head
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    let body = serde_json::json!({
        "method": head.method,
        "path": head.path,
        "version": head.version,
        "headers": headers,
    })
    .to_string();
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body.as_bytes());
    response
}

fn fixed_response(code: u16, reason: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
