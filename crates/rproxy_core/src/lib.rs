//! Connection-handling core: upstream pool, streaming pipeline, response
//! framing, per-connection handler, acceptor, and in-process metrics.

pub mod acceptor;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod response;
pub mod timeout;

pub use error::ProxyError;
pub use metrics::Metrics;
pub use pool::UpstreamPool;
