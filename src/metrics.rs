//! Exporter-agnostic metrics for the gateway.
//!
//! Thin helpers over the `metrics` crate macros. No recorder is installed here; the embedding
//! application may install any compatible exporter. Without one, every call is a no-op.
//!
//! Provided metrics:
//! * `gateway_requests_total` (counter: path, method, status)
//! * `gateway_request_duration_seconds` (histogram: path, method)
//! * `gateway_backend_requests_total` (counter: service, method, status)
//! * `gateway_backend_request_duration_seconds` (histogram: service, method)
//! * `gateway_backend_errors_total` (counter: service, kind)
//! * `gateway_circuit_rejections_total` (counter: service)
//! * `gateway_circuit_state` (gauge: service; 0 closed, 1 half-open, 2 open)
//! * `gateway_rate_limited_total` (counter: service)
//! * `gateway_registry_instances` (gauge: service)
//! * `gateway_registry_polls_total` (counter: outcome)
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

use crate::core::circuit_breaker::CircuitState;

pub const GATEWAY_REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const GATEWAY_REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const GATEWAY_BACKEND_REQUESTS_TOTAL: &str = "gateway_backend_requests_total";
pub const GATEWAY_BACKEND_REQUEST_DURATION_SECONDS: &str =
    "gateway_backend_request_duration_seconds";
pub const GATEWAY_BACKEND_ERRORS_TOTAL: &str = "gateway_backend_errors_total";
pub const GATEWAY_CIRCUIT_REJECTIONS_TOTAL: &str = "gateway_circuit_rejections_total";
pub const GATEWAY_CIRCUIT_STATE: &str = "gateway_circuit_state";
pub const GATEWAY_RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
pub const GATEWAY_REGISTRY_INSTANCES: &str = "gateway_registry_instances";
pub const GATEWAY_REGISTRY_POLLS_TOTAL: &str = "gateway_registry_polls_total";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        GATEWAY_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        GATEWAY_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        GATEWAY_BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Requests forwarded to backend services that produced a response."
    );
    describe_histogram!(
        GATEWAY_BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests forwarded to backend services."
    );
    describe_counter!(
        GATEWAY_BACKEND_ERRORS_TOTAL,
        Unit::Count,
        "Forwarded requests classified as failures (transport or status)."
    );
    describe_counter!(
        GATEWAY_CIRCUIT_REJECTIONS_TOTAL,
        Unit::Count,
        "Requests rejected because the service's circuit was open."
    );
    describe_gauge!(
        GATEWAY_CIRCUIT_STATE,
        "Circuit breaker state per service (0 closed, 1 half-open, 2 open)."
    );
    describe_counter!(
        GATEWAY_RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by the rate limiter."
    );
    describe_gauge!(
        GATEWAY_REGISTRY_INSTANCES,
        "Live instances per service in the current registry snapshot."
    );
    describe_counter!(
        GATEWAY_REGISTRY_POLLS_TOTAL,
        Unit::Count,
        "Registry polls by outcome."
    );
});

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Gateway metric descriptions registered");
}

pub fn increment_request_total(path: &str, method: &str, status: u16) {
    counter!(
        GATEWAY_REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(path: &str, method: &str, duration: Duration) {
    histogram!(
        GATEWAY_REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_backend_request_total(service: &str, method: &str, status: u16) {
    counter!(
        GATEWAY_BACKEND_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_backend_request_duration(service: &str, method: &str, duration: Duration) {
    histogram!(
        GATEWAY_BACKEND_REQUEST_DURATION_SECONDS,
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// `kind` is one of `status`, `transport` or `malformed_target`.
pub fn increment_backend_error(service: &str, kind: &'static str) {
    counter!(
        GATEWAY_BACKEND_ERRORS_TOTAL,
        "service" => service.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn increment_circuit_rejection(service: &str) {
    counter!(GATEWAY_CIRCUIT_REJECTIONS_TOTAL, "service" => service.to_string()).increment(1);
}

pub fn set_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!(GATEWAY_CIRCUIT_STATE, "service" => service.to_string()).set(value);
}

pub fn increment_rate_limited(service: &str) {
    counter!(GATEWAY_RATE_LIMITED_TOTAL, "service" => service.to_string()).increment(1);
}

pub fn set_registry_instances(service: &str, count: usize) {
    gauge!(GATEWAY_REGISTRY_INSTANCES, "service" => service.to_string()).set(count as f64);
}

pub fn increment_registry_poll(outcome: &'static str) {
    counter!(GATEWAY_REGISTRY_POLLS_TOTAL, "outcome" => outcome).increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    path: String,
    method: String,
}

impl RequestTimer {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.path, &self.method, self.start.elapsed());
    }
}
