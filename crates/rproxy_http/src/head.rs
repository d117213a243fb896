//! Request/response head parsing and serialization.
//!
//! Every byte is treated as ISO-8859-1 (latin-1): each input byte maps to
//! the codepoint of the same value, so the round trip through a `String`
//! never loses or rewrites a byte the client sent.

/// Hop-by-hop headers a conforming proxy must not forward as-is.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(lower_name: &str) -> bool {
    HOP_BY_HOP.contains(&lower_name)
}

#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("connection closed before a request line was read")]
    ConnectionClosed,
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),
    #[error("malformed header line: {0}")]
    MalformedHeaderLine(String),
}

/// One parsed request head: method, raw request-target, version, and an
/// ordered list of (lower-cased name, trimmed value) header pairs.
///
/// Duplicate header names are preserved in the list; callers that need a
/// single authoritative value for a framing header use [`HttpRequestHead::header`],
/// which collapses to the last occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequestHead {
    /// Last-wins lookup for a header, case-sensitive on the already
    /// lower-cased name.
    pub fn header(&self, lower_name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(name, _)| name == lower_name)
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}

/// Decode a byte slice as latin-1: one byte, one codepoint, no replacement.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Parse a header block: the request line plus header lines, each
/// terminated by CRLF or a bare LF, with the block itself already split
/// out of the surrounding byte stream by the caller (up to but excluding
/// the final blank line).
pub fn parse_request_head(raw: &[u8]) -> Result<HttpRequestHead, HeadError> {
    let text = decode_latin1(raw);
    let mut lines = text.split_inclusive('\n');

    let request_line = lines.next().unwrap_or("");
    let request_line = strip_line_ending(request_line);
    if request_line.is_empty() {
        return Err(HeadError::ConnectionClosed);
    }

    let parts: Vec<&str> = request_line.split(' ').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(HeadError::MalformedRequestLine(request_line.to_string()));
    }
    let method = parts[0].to_string();
    let path = parts[1].to_string();
    let version = parts[2].to_string();

    let mut headers = Vec::new();
    for line in lines {
        let line = strip_line_ending(line);
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(HeadError::MalformedHeaderLine(line.to_string()));
        };
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok(HttpRequestHead {
        method,
        path,
        version,
        headers,
    })
}

/// Serialize a request head the way it goes out on the wire: start line,
/// headers in insertion order, terminating blank line. Hop-by-hop headers
/// are dropped and a fresh `Connection: close` plus a framing header
/// (Content-Length or Transfer-Encoding: chunked) are appended by the
/// caller before this is invoked — this function writes exactly what it's
/// given.
pub fn serialize_request_head(head: &HttpRequestHead, out: &mut Vec<u8>) {
    out.extend_from_slice(format!("{} {} {}\r\n", head.method, head.path, head.version).as_bytes());
    for (name, value) in &head.headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// Build the outbound request head for a proxied request: copies through
/// every non-hop-by-hop header from the original, then appends the
/// framing header the pipeline decided on and a `Connection: close`
/// (upstream connections are never reused).
pub fn build_upstream_request_head(
    original: &HttpRequestHead,
    content_length: Option<u64>,
    is_chunked: bool,
) -> HttpRequestHead {
    let mut headers: Vec<(String, String)> = original
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && name != "content-length")
        .cloned()
        .collect();

    if is_chunked {
        headers.push(("transfer-encoding".to_string(), "chunked".to_string()));
    } else if let Some(len) = content_length {
        headers.push(("content-length".to_string(), len.to_string()));
    }
    headers.push(("connection".to_string(), "close".to_string()));

    HttpRequestHead {
        method: original.method.clone(),
        path: original.path.clone(),
        version: original.version.clone(),
        headers,
    }
}

/// Parse one status line, returning the numeric status code (0 if the
/// second whitespace-separated token isn't a decimal integer).
pub fn parse_status_code(status_line: &str) -> u16 {
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|tok| tok.parse::<u16>().ok())
        .unwrap_or(0)
}

/// Split one header line into a (lower-cased name, trimmed value) pair.
/// Lines without a `:` are not headers (the blank terminator is handled
/// by the caller before this is reached).
pub fn split_header_line(line: &str) -> Option<(String, String)> {
    let line = strip_line_ending(line);
    let (name, value) = line.split_once(':')?;
    Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
}

/// Response framing as determined from the sniffed headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    FixedLength(u64),
    Chunked,
    UntilClose,
}

/// Strip a `;`-delimited chunk extension from a chunk size line before
/// parsing the hex size, per strict RFC 7230 handling (chunk extensions
/// are not validated, just discarded).
pub fn strip_chunk_extension(size_line: &str) -> &str {
    let trimmed = strip_line_ending(size_line).trim();
    trimmed.split(';').next().unwrap_or("").trim()
}

pub fn parse_chunk_size(size_line: &str) -> Option<u64> {
    let stripped = strip_chunk_extension(size_line);
    u64::from_str_radix(stripped, 16).ok()
}

/// HEAD requests and these status codes never carry a response body.
pub fn is_bodyless(method: &str, status_code: u16) -> bool {
    if method.eq_ignore_ascii_case("HEAD") {
        return true;
    }
    matches!(status_code, 100..=199 | 204 | 304)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_request_head() {
        let raw = b"GET /foo HTTP/1.1\r\nHost: example.com\r\nX-Test: 1\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/foo");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(
            head.headers,
            vec![
                ("host".to_string(), "example.com".to_string()),
                ("x-test".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_request_line() {
        let raw = b"GET /foo\r\nHost: x\r\n";
        let err = parse_request_head(raw).unwrap_err();
        assert!(matches!(err, HeadError::MalformedRequestLine(_)));
    }

    #[test]
    fn empty_first_line_is_connection_closed() {
        let err = parse_request_head(b"").unwrap_err();
        assert!(matches!(err, HeadError::ConnectionClosed));
    }

    #[test]
    fn rejects_header_line_without_colon() {
        let raw = b"GET / HTTP/1.1\r\nHost example.com\r\n";
        let err = parse_request_head(raw).unwrap_err();
        assert!(matches!(err, HeadError::MalformedHeaderLine(_)));
    }

    #[test]
    fn last_wins_duplicate_header_lookup_preserves_list() {
        let raw = b"GET / HTTP/1.1\r\nX-Dup: a\r\nX-Dup: b\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.headers.len(), 2);
        assert_eq!(head.header("x-dup"), Some("b"));
    }

    #[test]
    fn content_length_and_chunked_views() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 42\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.content_length(), Some(42));
        assert!(!head.is_chunked());

        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n";
        let head = parse_request_head(raw).unwrap();
        assert!(head.is_chunked());
    }

    #[test]
    fn serialize_round_trips_header_order_and_values() {
        let head = HttpRequestHead {
            method: "GET".to_string(),
            path: "/foo".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: vec![
                ("host".to_string(), "example.com".to_string()),
                ("x-test".to_string(), "1".to_string()),
            ],
        };
        let mut out = Vec::new();
        serialize_request_head(&head, &mut out);
        assert_eq!(
            out,
            b"GET /foo HTTP/1.1\r\nhost: example.com\r\nx-test: 1\r\n\r\n"
        );
    }

    #[test]
    fn build_upstream_request_head_strips_hop_by_hop_and_sets_framing() {
        let original = HttpRequestHead {
            method: "POST".to_string(),
            path: "/echo".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: vec![
                ("host".to_string(), "example.com".to_string()),
                ("connection".to_string(), "keep-alive".to_string()),
                ("content-length".to_string(), "5".to_string()),
            ],
        };
        let upstream_head = build_upstream_request_head(&original, Some(5), false);
        assert!(upstream_head.header("connection") == Some("close"));
        assert_eq!(upstream_head.header("content-length"), Some("5"));
        assert_eq!(upstream_head.header("host"), Some("example.com"));
    }

    #[test]
    fn chunk_size_strips_extension_before_parsing() {
        assert_eq!(parse_chunk_size("1a;foo=bar\r\n"), Some(0x1a));
        assert_eq!(parse_chunk_size("0\r\n"), Some(0));
        assert_eq!(parse_chunk_size("zz\r\n"), None);
    }

    #[test]
    fn status_code_parsing_falls_back_to_zero() {
        assert_eq!(parse_status_code("HTTP/1.1 200 OK\r\n"), 200);
        assert_eq!(parse_status_code("garbage\r\n"), 0);
    }

    #[test]
    fn bodyless_responses() {
        assert!(is_bodyless("HEAD", 200));
        assert!(is_bodyless("GET", 204));
        assert!(is_bodyless("GET", 304));
        assert!(is_bodyless("GET", 100));
        assert!(!is_bodyless("GET", 200));
    }
}
