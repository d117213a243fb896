use crate::{ConfigReport, ProxyConfig};

/// Validate a fully assembled config, collecting every problem rather
/// than stopping at the first one. A report with `has_errors() == true`
/// means the config must not be used to start the proxy.
pub fn validate(cfg: &ProxyConfig) -> ConfigReport {
    let mut report = ConfigReport::default();

    if cfg.upstreams.is_empty() {
        report.error("upstreams list must not be empty");
    }
    for upstream in &cfg.upstreams {
        if upstream.port == 0 {
            report.error(format!("upstream '{}' has port 0", upstream.host));
        }
    }

    if cfg.listen_host.trim().is_empty() {
        report.error("listen_host must not be empty");
    }
    if cfg.listen_port == 0 {
        report.error("listen_port must not be 0");
    }

    if cfg.timeouts.connect_ms == 0 {
        report.error("timeouts.connect_ms must be positive");
    }
    if cfg.timeouts.read_ms == 0 {
        report.error("timeouts.read_ms must be positive");
    }
    if cfg.timeouts.write_ms == 0 {
        report.error("timeouts.write_ms must be positive");
    }
    if cfg.timeouts.total_ms == 0 {
        report.warn("timeouts.total_ms is 0; the total-request deadline is unenforced anyway");
    }

    if cfg.limits.max_client_conns == 0 {
        report.error("limits.max_client_conns must be positive");
    }
    if cfg.limits.max_conns_per_upstream == 0 {
        report.error("limits.max_conns_per_upstream must be positive");
    }

    match cfg.log_level.to_ascii_lowercase().as_str() {
        "debug" | "info" | "warn" | "error" => {}
        other => report.warn(format!("unrecognized log_level '{other}', falling back to info")),
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UpstreamSpec;

    #[test]
    fn empty_upstreams_is_an_error() {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams.clear();
        let report = validate(&cfg);
        assert!(report.has_errors());
    }

    #[test]
    fn zero_timeout_is_an_error() {
        let mut cfg = ProxyConfig::default();
        cfg.timeouts.read_ms = 0;
        let report = validate(&cfg);
        assert!(report.has_errors());
    }

    #[test]
    fn reports_every_problem_in_one_pass() {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams.clear();
        cfg.limits.max_client_conns = 0;
        cfg.timeouts.connect_ms = 0;
        let report = validate(&cfg);
        assert_eq!(report.errors().len(), 3);
    }

    #[test]
    fn zero_port_upstream_is_an_error() {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams.push(UpstreamSpec::new("127.0.0.1", 0));
        let report = validate(&cfg);
        assert!(report.has_errors());
    }
}
