use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all relay metrics
const PREFIX: &str = "tool_relay";

/// Tool label for invocations of names that are not registered.
pub const UNKNOWN_TOOL_LABEL: &str = "unknown";

/// Path label for requests that matched no route.
pub const UNMATCHED_PATH_LABEL: &str = "unmatched";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Tool Invocation Metrics
    pub static ref TOOL_INVOCATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_tool_invocations_total"), "Tool invocations by outcome"),
        &["tool", "outcome"]
    ).expect("Failed to create tool_invocations_total metric");

    pub static ref TOOL_INVOCATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_tool_invocation_duration_seconds"),
            "Tool invocation duration in seconds, including admission and cache"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["tool"]
    ).expect("Failed to create tool_invocation_duration_seconds metric");

    // Cache Metrics
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cache_lookups_total"), "Cache lookups by tier and result"),
        &["tier", "result"]
    ).expect("Failed to create cache_lookups_total metric");

    pub static ref CACHE_DEGRADED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cache_degraded_total"), "Durable cache failures absorbed"),
        &["operation"]
    ).expect("Failed to create cache_degraded_total metric");

    // Rate Limiting Metrics
    pub static ref RATE_LIMIT_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_rate_limit_wait_seconds"),
            "Time spent waiting for an admission token"
        )
        .buckets(vec![0.0, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0])
    ).expect("Failed to create rate_limit_wait_seconds metric");

    // Connection Metrics
    pub static ref WS_ACTIVE_CONNECTIONS: Gauge = Gauge::new(
        format!("{PREFIX}_ws_active_connections"),
        "Number of authenticated persistent connections"
    ).expect("Failed to create ws_active_connections metric");

    pub static ref BROADCAST_DELIVERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_broadcast_deliveries_total"), "Notification deliveries by result"),
        &["result"]
    ).expect("Failed to create broadcast_deliveries_total metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TOOL_INVOCATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TOOL_INVOCATION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_LOOKUPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_DEGRADED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RATE_LIMIT_WAIT_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(WS_ACTIVE_CONNECTIONS.clone()));
    let _ = REGISTRY.register(Box::new(BROADCAST_DELIVERIES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a completed tool invocation. `outcome` is `ok` or an error kind.
pub fn record_tool_invocation(tool: &str, outcome: &str, duration: Duration) {
    TOOL_INVOCATIONS_TOTAL
        .with_label_values(&[tool, outcome])
        .inc();

    TOOL_INVOCATION_DURATION_SECONDS
        .with_label_values(&[tool])
        .observe(duration.as_secs_f64());
}

pub fn record_cache_lookup(tier: &str, result: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[tier, result]).inc();
}

pub fn record_cache_degraded(operation: &str) {
    CACHE_DEGRADED_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_rate_limit_wait(waited: Duration) {
    RATE_LIMIT_WAIT_SECONDS.observe(waited.as_secs_f64());
}

pub fn set_active_connections(count: usize) {
    WS_ACTIVE_CONNECTIONS.set(count as f64);
}

pub fn record_broadcast(delivered: usize, failed: usize) {
    BROADCAST_DELIVERIES_TOTAL
        .with_label_values(&["delivered"])
        .inc_by(delivered as f64);
    BROADCAST_DELIVERIES_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
