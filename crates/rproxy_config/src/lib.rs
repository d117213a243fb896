//! Configuration loading and validation.
//!
//! A [`ProxyConfig`] is assembled in layers: [`ProxyConfig::default`],
//! then an optional file via [`ProxyConfig::from_file`], then explicit
//! CLI overrides applied by the caller. [`validate`] is run on the final
//! result and collects every problem it finds rather than bailing on the
//! first one, so a user sees the whole picture in one run.

mod report;
mod upstream;
mod validate;

use std::time::Duration;

use serde::Deserialize;

pub use report::ConfigReport;
pub use upstream::UpstreamSpec;
pub use validate::validate;

#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    #[serde(default = "Timeouts::default_connect_ms")]
    pub connect_ms: u64,
    #[serde(default = "Timeouts::default_read_ms")]
    pub read_ms: u64,
    #[serde(default = "Timeouts::default_write_ms")]
    pub write_ms: u64,
    #[serde(default = "Timeouts::default_total_ms")]
    pub total_ms: u64,
}

impl Timeouts {
    fn default_connect_ms() -> u64 {
        1_000
    }
    fn default_read_ms() -> u64 {
        15_000
    }
    fn default_write_ms() -> u64 {
        15_000
    }
    fn default_total_ms() -> u64 {
        30_000
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: Self::default_connect_ms(),
            read_ms: Self::default_read_ms(),
            write_ms: Self::default_write_ms(),
            total_ms: Self::default_total_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    #[serde(default = "Limits::default_max_client_conns")]
    pub max_client_conns: usize,
    #[serde(default = "Limits::default_max_conns_per_upstream")]
    pub max_conns_per_upstream: usize,
}

impl Limits {
    fn default_max_client_conns() -> usize {
        1_000
    }
    fn default_max_conns_per_upstream() -> usize {
        100
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_client_conns: Self::default_max_client_conns(),
            max_conns_per_upstream: Self::default_max_conns_per_upstream(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "ProxyConfig::default_listen_host")]
    pub listen_host: String,
    #[serde(default = "ProxyConfig::default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "ProxyConfig::default_upstreams")]
    pub upstreams: Vec<UpstreamSpec>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default = "ProxyConfig::default_log_level")]
    pub log_level: String,
}

impl ProxyConfig {
    fn default_listen_host() -> String {
        "127.0.0.1".to_string()
    }
    fn default_listen_port() -> u16 {
        8080
    }
    fn default_upstreams() -> Vec<UpstreamSpec> {
        vec![
            UpstreamSpec::new("127.0.0.1", 9001),
            UpstreamSpec::new("127.0.0.1", 9002),
        ]
    }
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Load from a TOML config file. Missing fields fall back to the
    /// built-in defaults above, following `config`'s layered-source model.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let built = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        Ok(built.try_deserialize()?)
    }

    /// Apply explicit CLI overrides over whatever was loaded (defaults or
    /// file). CLI flags always win.
    pub fn apply_overrides(
        &mut self,
        host: Option<String>,
        port: Option<u16>,
        log_level: Option<String>,
    ) {
        if let Some(host) = host {
            self.listen_host = host;
        }
        if let Some(port) = port {
            self.listen_port = port;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: Self::default_listen_host(),
            listen_port: Self::default_listen_port(),
            upstreams: Self::default_upstreams(),
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_two_upstreams_and_passes_validation() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.upstreams.len(), 2);
        let report = validate(&cfg);
        assert!(report.is_ok(), "{report:?}");
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut cfg = ProxyConfig::default();
        cfg.apply_overrides(Some("0.0.0.0".to_string()), Some(9090), None);
        assert_eq!(cfg.listen_host, "0.0.0.0");
        assert_eq!(cfg.listen_port, 9090);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn listen_addr_combines_host_and_port() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.listen_addr(), "127.0.0.1:8080");
    }
}
