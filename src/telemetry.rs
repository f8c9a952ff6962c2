use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics exporter failed to start: {0}")]
    Exporter(String),
}

pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: u16) -> Result<(), TelemetryError> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    tracing::info!(port = port, "Prometheus exporter listening on /metrics");
    metrics::gauge!("lobx_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_port: u16) -> Result<(), TelemetryError> { Ok(()) }

pub const REQUESTS_TOTAL: &str = "lobx_requests_total";
pub const REJECTIONS_TOTAL: &str = "lobx_rejections_total";
pub const MATCHES_TOTAL: &str = "lobx_matches_total";
pub const WORKER_RESTARTS_TOTAL: &str = "lobx_worker_restarts_total";
pub const MATCH_LATENCY_US: &str = "lobx_match_latency_us";

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "metrics-exporter"))]
    #[test]
    fn test_metrics_disabled_without_exporter() {
        assert!(init_metrics(0).is_ok());
    }

    #[test]
    fn test_exporter_error_message() {
        let err = TelemetryError::Exporter("address in use".to_string());
        assert_eq!(err.to_string(), "metrics exporter failed to start: address in use");
    }
}
