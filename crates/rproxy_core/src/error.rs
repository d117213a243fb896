//! Tagged error taxonomy. Classified by variant, never by string
//! matching, because the variant drives the status code the client sees.

use crate::timeout::TimedOut;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("timeout: {0}")]
    Timeout(#[from] TimedOut),

    #[error("connection error ({direction}): {cause}")]
    Connection { direction: &'static str, cause: String },

    #[error("framing error: {0}")]
    Framing(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ProxyError {
    pub fn connection(direction: &'static str, cause: impl ToString) -> Self {
        ProxyError::Connection {
            direction,
            cause: cause.to_string(),
        }
    }

    /// The status code this error maps to, per the first-matching-rule
    /// table: timeout -> 504, connection -> 502, anything else -> 500.
    /// Framing/Malformed/Upstream fall into "any other failure" even
    /// though they have their own tagged variants, because the table
    /// only distinguishes three buckets by user-visible status.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::Timeout(_) => 504,
            ProxyError::Connection { .. } => 502,
            ProxyError::Framing(_)
            | ProxyError::Malformed(_)
            | ProxyError::Upstream(_)
            | ProxyError::Unexpected(_) => 500,
        }
    }

    pub fn is_warn_level(&self) -> bool {
        !matches!(self, ProxyError::Unexpected(_))
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::connection("io", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_maps_to_504() {
        let err = ProxyError::Timeout(TimedOut {
            label: "read".to_string(),
            duration: Duration::from_secs(1),
        });
        assert_eq!(err.status_code(), 504);
    }

    #[test]
    fn connection_maps_to_502() {
        let err = ProxyError::connection("upstream", "refused");
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn malformed_maps_to_500_not_502() {
        let err = ProxyError::Malformed("bad request line".to_string());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn unexpected_maps_to_500_and_is_not_warn_level() {
        let err = ProxyError::Unexpected("boom".to_string());
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_warn_level());
    }
}
