//! Byte-level streaming copies between a source and a destination, with
//! a fixed transfer buffer and a timeout bound on every read and every
//! drain. This is the one place bytes move between client and upstream;
//! everything above it (head parsing, framing decisions) just decides
//! which of these three functions to call and with what arguments.

use std::time::Duration;

use bytes::BytesMut;
use rproxy_http::head::parse_chunk_size;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;
use crate::timeout::with_timeout;

const TRANSFER_BUFFER: usize = 16 * 1024;

/// Leftover bytes already pulled off a stream (e.g. while sniffing a
/// head) that must be consumed before further reads. Every streaming
/// copy takes one of these so head-parsing overreads aren't lost.
#[derive(Default)]
pub struct ReadBuffer {
    buf: BytesMut,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read one line terminated by `\n` (a preceding `\r`, if any, is kept
    /// as part of the returned bytes so callers see the original ending),
    /// pulling more bytes from `src` as needed. EOF is tolerated as a
    /// terminator too: once the peer closes, whatever is left in the
    /// buffer is returned as a final, possibly unterminated line, and any
    /// further call returns an empty vector.
    pub async fn read_line<R>(
        &mut self,
        src: &mut R,
        read_timeout: Duration,
    ) -> Result<Vec<u8>, ProxyError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                return Ok(line.to_vec());
            }
            let n = self.fill(src, read_timeout).await?;
            if n == 0 {
                let rest = self.buf.len();
                let line = self.buf.split_to(rest);
                return Ok(line.to_vec());
            }
        }
    }

    async fn fill<R>(&mut self, src: &mut R, read_timeout: Duration) -> Result<usize, ProxyError>
    where
        R: AsyncRead + Unpin,
    {
        let mut tmp = [0u8; TRANSFER_BUFFER];
        let n = with_timeout(src.read(&mut tmp), read_timeout, "read")
            .await
            .map_err(ProxyError::Timeout)?
            .map_err(|e| ProxyError::connection("read", e))?;
        if n > 0 {
            self.buf.extend_from_slice(&tmp[..n]);
        }
        Ok(n)
    }
}

async fn drain_write<W>(
    dst: &mut W,
    bytes: &[u8],
    write_timeout: Duration,
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    with_timeout(dst.write_all(bytes), write_timeout, "write")
        .await
        .map_err(ProxyError::Timeout)?
        .map_err(|e| ProxyError::connection("write", e))?;
    with_timeout(dst.flush(), write_timeout, "write")
        .await
        .map_err(ProxyError::Timeout)?
        .map_err(|e| ProxyError::connection("write", e))
}

/// Copy exactly `length` bytes from `src` to `dst`. A read returning
/// zero bytes before `length` is reached is a premature-EOF error.
pub async fn copy_fixed<R, W>(
    buf: &mut ReadBuffer,
    src: &mut R,
    dst: &mut W,
    mut length: u64,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while length > 0 {
        if buf.buf.is_empty() {
            let n = buf.fill(src, read_timeout).await?;
            if n == 0 {
                return Err(ProxyError::connection(
                    "read",
                    "peer closed before body was fully read",
                ));
            }
        }
        let take = (length.min(buf.buf.len() as u64)) as usize;
        let chunk = buf.buf.split_to(take);
        drain_write(dst, &chunk, write_timeout).await?;
        length -= take as u64;
    }
    Ok(())
}

/// Copy a chunked-encoded body, forwarding size lines verbatim (the
/// wire framing a peer sees is unchanged) while parsing them strictly
/// with any chunk-extension stripped first.
pub async fn copy_chunked<R, W>(
    buf: &mut ReadBuffer,
    src: &mut R,
    dst: &mut W,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let size_line = buf.read_line(src, read_timeout).await?;
        drain_write(dst, &size_line, write_timeout).await?;

        let text = String::from_utf8_lossy(&size_line);
        let size = parse_chunk_size(&text)
            .ok_or_else(|| ProxyError::Framing(format!("invalid chunk size line: {text:?}")))?;

        if size == 0 {
            loop {
                let trailer = buf.read_line(src, read_timeout).await?;
                drain_write(dst, &trailer, write_timeout).await?;
                if trailer.is_empty() || trailer == b"\r\n" || trailer == b"\n" {
                    return Ok(());
                }
            }
        }

        copy_fixed(buf, src, dst, size + 2, read_timeout, write_timeout).await?;
    }
}

/// Copy bytes from `src` to `dst` until `src` reports EOF. Used for the
/// response direction only, when neither Content-Length nor chunked
/// framing was sniffed off the status line.
pub async fn copy_until_close<R, W>(
    buf: &mut ReadBuffer,
    src: &mut R,
    dst: &mut W,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !buf.buf.is_empty() {
        let chunk = buf.buf.split_to(buf.buf.len());
        drain_write(dst, &chunk, write_timeout).await?;
    }
    loop {
        let n = buf.fill(src, read_timeout).await?;
        if n == 0 {
            return Ok(());
        }
        let chunk = buf.buf.split_to(buf.buf.len());
        drain_write(dst, &chunk, write_timeout).await?;
    }
}

/// Wraps a writer and tallies bytes successfully written, for the
/// metrics byte counters. Transparent otherwise — errors and partial
/// writes pass straight through to the inner writer's own semantics.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        let poll = std::pin::Pin::new(&mut self.inner).poll_write(cx, buf);
        if let std::task::Poll::Ready(Ok(n)) = &poll {
            self.count += *n as u64;
        }
        poll
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn counting_writer_tallies_bytes_written() {
        let mut writer = CountingWriter::new(Vec::new());
        writer.write_all(b"hello").await.unwrap();
        writer.write_all(b" world").await.unwrap();
        assert_eq!(writer.count(), 11);
        assert_eq!(writer.into_inner(), b"hello world");
    }

    #[tokio::test]
    async fn read_line_splits_on_bare_lf() {
        let mut buf = ReadBuffer::new();
        let mut src = Cursor::new(b"GET / HTTP/1.0\n\n".to_vec());
        let first = buf
            .read_line(&mut src, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(first, b"GET / HTTP/1.0\n");
        let second = buf
            .read_line(&mut src, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(second, b"\n");
    }

    #[tokio::test]
    async fn read_line_treats_eof_as_terminator() {
        let mut buf = ReadBuffer::new();
        let mut src = Cursor::new(b"no newline here".to_vec());
        let line = buf
            .read_line(&mut src, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(line, b"no newline here");
        let next = buf
            .read_line(&mut src, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn copy_fixed_forwards_exact_length_and_leaves_rest_buffered() {
        let mut buf = ReadBuffer::new();
        let mut src = Cursor::new(b"hello world".to_vec());
        let mut dst = Vec::new();
        copy_fixed(
            &mut buf,
            &mut src,
            &mut dst,
            5,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert_eq!(dst, b"hello");
    }

    #[tokio::test]
    async fn copy_fixed_errors_on_premature_eof() {
        let mut buf = ReadBuffer::new();
        let mut src = Cursor::new(b"hi".to_vec());
        let mut dst = Vec::new();
        let result = copy_fixed(
            &mut buf,
            &mut src,
            &mut dst,
            10,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn copy_chunked_forwards_size_lines_verbatim_and_stops_at_terminator() {
        let mut buf = ReadBuffer::new();
        let body = b"5\r\nhello\r\n0\r\n\r\n".to_vec();
        let mut src = Cursor::new(body.clone());
        let mut dst = Vec::new();
        copy_chunked(
            &mut buf,
            &mut src,
            &mut dst,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert_eq!(dst, body);
    }

    #[tokio::test]
    async fn copy_chunked_strips_extension_before_parsing_size() {
        let mut buf = ReadBuffer::new();
        let body = b"5;ignored=true\r\nhello\r\n0\r\n\r\n".to_vec();
        let mut src = Cursor::new(body.clone());
        let mut dst = Vec::new();
        copy_chunked(
            &mut buf,
            &mut src,
            &mut dst,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert_eq!(dst, body, "extension line still forwarded verbatim");
    }

    #[tokio::test]
    async fn copy_chunked_rejects_bad_size_line() {
        let mut buf = ReadBuffer::new();
        let mut src = Cursor::new(b"not-hex\r\n".to_vec());
        let mut dst = Vec::new();
        let result = copy_chunked(
            &mut buf,
            &mut src,
            &mut dst,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(ProxyError::Framing(_))));
    }

    #[tokio::test]
    async fn copy_until_close_forwards_everything_then_returns_on_eof() {
        let mut buf = ReadBuffer::new();
        let mut src = Cursor::new(b"all of this until eof".to_vec());
        let mut dst = Vec::new();
        copy_until_close(
            &mut buf,
            &mut src,
            &mut dst,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert_eq!(dst, b"all of this until eof");
    }
}
