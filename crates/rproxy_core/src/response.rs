//! Reads an upstream response head, sniffs its framing, and forwards it
//! (hop-by-hop headers stripped) to the client before streaming the body.

use std::time::Duration;

use rproxy_http::head::{is_bodyless, is_hop_by_hop, parse_status_code, split_header_line, ResponseFraming};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;
use crate::pipeline::{copy_chunked, copy_fixed, copy_until_close, ReadBuffer};

/// Sniffed response metadata needed to both forward the head and pick
/// the right body-copy function.
#[derive(Debug, Default)]
struct ResponseHead {
    status_code: u16,
    content_length: Option<u64>,
    is_chunked: bool,
}

fn parse_response_head(raw: &str) -> Result<(ResponseHead, Vec<u8>), ProxyError> {
    let mut lines = raw.split_inclusive('\n');
    let status_line = lines
        .next()
        .ok_or_else(|| ProxyError::Framing("empty upstream response".to_string()))?;

    let mut info = ResponseHead {
        status_code: parse_status_code(status_line),
        ..Default::default()
    };

    let mut out = Vec::new();
    out.extend_from_slice(status_line.trim_end_matches(['\r', '\n']).as_bytes());
    out.extend_from_slice(b"\r\n");

    for line in lines {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }
        let Some((name, value)) = split_header_line(trimmed) else {
            continue;
        };

        if name == "content-length" {
            // An unparseable value is ignored, leaving framing as it was;
            // a repeated header is last-wins.
            if let Ok(len) = value.parse::<u64>() {
                info.content_length = Some(len);
            }
            continue;
        }
        if name == "transfer-encoding" {
            if value.eq_ignore_ascii_case("chunked") {
                info.is_chunked = true;
            }
            continue;
        }
        if is_hop_by_hop(&name) {
            continue;
        }

        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if info.is_chunked {
        out.extend_from_slice(b"transfer-encoding: chunked\r\n");
    } else if let Some(len) = info.content_length {
        out.extend_from_slice(format!("content-length: {len}\r\n").as_bytes());
    }
    out.extend_from_slice(b"connection: close\r\n\r\n");

    Ok((info, out))
}

fn framing_for(info: &ResponseHead) -> ResponseFraming {
    if info.is_chunked {
        ResponseFraming::Chunked
    } else if let Some(len) = info.content_length {
        ResponseFraming::FixedLength(len)
    } else {
        ResponseFraming::UntilClose
    }
}

/// Read the upstream response head, write the forwarded head (with
/// hop-by-hop headers stripped) to the client, then stream the body
/// according to the framing it sniffed. Returns the upstream status
/// code for metrics/logging.
pub async fn stream_response<R, W>(
    buf: &mut ReadBuffer,
    upstream: &mut R,
    client: &mut W,
    method: &str,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<u16, ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let head_bytes = read_head(buf, upstream, read_timeout).await?;
    let head_text = String::from_utf8_lossy(&head_bytes).into_owned();
    let (info, forwarded_head) = parse_response_head(&head_text)?;

    client
        .write_all(&forwarded_head)
        .await
        .map_err(|e| ProxyError::connection("write", e))?;
    client
        .flush()
        .await
        .map_err(|e| ProxyError::connection("write", e))?;

    if is_bodyless(method, info.status_code) {
        return Ok(info.status_code);
    }

    match framing_for(&info) {
        ResponseFraming::FixedLength(len) => {
            copy_fixed(buf, upstream, client, len, read_timeout, write_timeout).await?
        }
        ResponseFraming::Chunked => {
            copy_chunked(buf, upstream, client, read_timeout, write_timeout).await?
        }
        ResponseFraming::UntilClose => {
            copy_until_close(buf, upstream, client, read_timeout, write_timeout).await?
        }
    }

    Ok(info.status_code)
}

async fn read_head<R>(
    buf: &mut ReadBuffer,
    upstream: &mut R,
    read_timeout: Duration,
) -> Result<Vec<u8>, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let line = buf.read_line(upstream, read_timeout).await?;
        let is_blank = line.is_empty() || line == b"\r\n" || line == b"\n";
        head.extend_from_slice(&line);
        if is_blank {
            return Ok(head);
        }
    }
}
