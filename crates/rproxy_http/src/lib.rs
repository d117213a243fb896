//! HTTP/1.x head codec: request-line/header parsing and serialization,
//! status-line/header sniffing, and the minimal error pages the proxy
//! synthesizes itself.

pub mod head;
pub mod responses;

pub use head::{HeadError, HttpRequestHead};
