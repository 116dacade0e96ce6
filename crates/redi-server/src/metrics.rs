//! Prometheus metrics for the restoration server
//!
//! Labels are limited to language, tier and outcome; request content
//! (names being restored) and client addresses are never recorded.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_RATE_LIMITED: &str = "rate_limited";
pub const OUTCOME_CLIENT_ERROR: &str = "client_error";
pub const OUTCOME_SERVER_ERROR: &str = "server_error";

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

pub fn record_request(language: &str, outcome: &str, duration: Duration) {
    counter!("redi_requests_total", "language" => language.to_string(), "outcome" => outcome.to_string()).increment(1);
    histogram!("redi_request_duration_seconds", "language" => language.to_string(), "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_rate_limited(tier: &str) {
    counter!("redi_rate_limited_total", "tier" => tier.to_string()).increment(1);
}

pub fn set_model_loaded(language: &str, loaded: bool) {
    gauge!("redi_model_loaded", "language" => language.to_string()).set(if loaded { 1.0 } else { 0.0 });
}

pub fn record_model_load(language: &str, status: &str, duration: Duration) {
    counter!("redi_model_loads_total", "language" => language.to_string(), "status" => status.to_string()).increment(1);
    histogram!("redi_model_load_duration_seconds", "language" => language.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());
}

pub fn set_loads_in_flight(count: usize) {
    gauge!("redi_loads_in_flight").set(count as f64);
}

pub fn record_eviction(language: &str) {
    counter!("redi_evictions_total", "language" => language.to_string()).increment(1);
}

pub fn set_rate_limit_clients(count: usize) {
    gauge!("redi_rate_limit_clients").set(count as f64);
}

pub fn init_prometheus_recorder() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;
    Ok(handle)
}
