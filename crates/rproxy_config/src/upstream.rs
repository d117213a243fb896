use serde::Deserialize;

/// An immutable upstream descriptor: created at config load, lives for
/// the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamSpec {
    pub host: String,
    pub port: u16,
}

impl UpstreamSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_joins_host_and_port() {
        let spec = UpstreamSpec::new("10.0.0.1", 9100);
        assert_eq!(spec.address(), "10.0.0.1:9100");
    }
}
