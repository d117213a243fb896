//! Process entry point: parses flags, wires logging, loads and validates
//! configuration, builds the upstream pool and admission primitives, and
//! runs the accept loop until a termination signal arrives.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rproxy_config::{validate, ProxyConfig};
use rproxy_core::acceptor::{accept_loop, bind_listener};
use rproxy_core::metrics::run_periodic_report;
use rproxy_core::{Metrics, UpstreamPool};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Streaming HTTP/1.x reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "rproxyd", version, about)]
struct Args {
    /// Path to a TOML configuration file. Missing or malformed falls back
    /// to built-in defaults with a logged warning.
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Overrides the configured listen host.
    #[arg(short = 'H', long = "host")]
    host: Option<String>,

    /// Overrides the configured listen port.
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Overrides the configured log level (debug, info, warn, error).
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> ProxyConfig {
    let mut cfg = match &args.config {
        Some(path) => match ProxyConfig::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("failed to load config file '{path}': {e}; falling back to defaults");
                ProxyConfig::default()
            }
        },
        None => ProxyConfig::default(),
    };
    cfg.apply_overrides(args.host.clone(), args.port, args.log_level.clone());
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = load_config(&args);

    rproxy_util::init_tracing(&cfg.log_level);

    let report = validate(&cfg);
    for problem in report.warnings() {
        warn!(target: "rproxyd", "{problem}");
    }
    if report.has_errors() {
        for problem in report.errors() {
            tracing::error!(target: "rproxyd", "{problem}");
        }
        anyhow::bail!("configuration failed validation, refusing to start");
    }

    let pool = Arc::new(UpstreamPool::new(
        cfg.upstreams.clone(),
        cfg.limits.max_conns_per_upstream,
    )?);
    let admission = Arc::new(Semaphore::new(cfg.limits.max_client_conns));
    let metrics = Arc::new(Metrics::new());

    info!(
        target: "rproxyd",
        listen = %cfg.listen_addr(),
        upstreams = ?cfg.upstreams.iter().map(|u| u.address()).collect::<Vec<_>>(),
        max_client_conns = cfg.limits.max_client_conns,
        max_conns_per_upstream = cfg.limits.max_conns_per_upstream,
        "starting rproxyd"
    );

    let listener = bind_listener(&cfg.listen_addr()).await?;

    tokio::spawn(run_periodic_report(Arc::clone(&metrics), Duration::from_secs(60)));

    let accept = tokio::spawn(accept_loop(
        listener,
        admission,
        pool,
        cfg.timeouts.clone(),
        metrics,
    ));

    tokio::select! {
        result = accept => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(target: "rproxyd", "received shutdown signal, stopping");
        }
    }

    info!(target: "rproxyd", "rproxyd exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_from_cli_flags_win_over_defaults() {
        let args = Args {
            config: None,
            host: Some("0.0.0.0".to_string()),
            port: Some(9999),
            log_level: None,
        };
        let cfg = load_config(&args);
        assert_eq!(cfg.listen_host, "0.0.0.0");
        assert_eq!(cfg.listen_port, 9999);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let args = Args {
            config: Some("/nonexistent/path/rproxy.toml".to_string()),
            host: None,
            port: None,
            log_level: None,
        };
        let cfg = load_config(&args);
        assert_eq!(cfg.listen_port, ProxyConfig::default().listen_port);
    }
}
