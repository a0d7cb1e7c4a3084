//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`.
//! Installed only when `[metrics] enabled = true`.

use std::net::SocketAddr;

use anyhow::Result;
use gordo_core::config::MetricsConfig;
use gordo_core::metrics as m;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process. Classification latency is exported as a
/// histogram with fixed buckets.
///
/// # Errors
///
/// - The endpoint is not `/metrics`
/// - The listen address does not parse
/// - A global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::CLASSIFIER_DURATION_SECONDS.to_owned()),
            &m::CLASSIFY_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listen_addr() {
        let addr = listen_addr(&MetricsConfig::default()).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9187");
    }

    #[test]
    fn custom_endpoint_is_rejected() {
        let config = MetricsConfig {
            endpoint: "/stats".to_owned(),
            ..MetricsConfig::default()
        };
        assert!(listen_addr(&config).is_err());
    }

    #[test]
    fn bad_address_is_rejected() {
        let config = MetricsConfig {
            listen_addr: "not-an-ip".to_owned(),
            ..MetricsConfig::default()
        };
        assert!(listen_addr(&config).is_err());
    }
}
