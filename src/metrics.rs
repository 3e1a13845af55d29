//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Identity provider
    pub static ref PROVIDER_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wavelogin_provider_requests_total", "Total number of identity provider calls"),
        &["endpoint", "status"]
    ).expect("metric can be created");
    pub static ref PROVIDER_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "wavelogin_provider_request_duration_seconds",
            "Identity provider call duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["endpoint"]
    ).expect("metric can be created");

    // Authentication
    pub static ref LOGINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wavelogin_logins_total", "Total number of login attempts"),
        &["result"]
    ).expect("metric can be created");
    pub static ref USERS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "wavelogin_users_created_total",
        "Total number of users created on first login"
    ).expect("metric can be created");
    pub static ref USERS_TOTAL: IntGauge = IntGauge::new(
        "wavelogin_users_total",
        "Number of locally known users"
    ).expect("metric can be created");
    pub static ref FORCED_LOGOUTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wavelogin_forced_logouts_total", "Total number of logout webhook calls"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref SESSIONS_INVALIDATED_TOTAL: IntCounter = IntCounter::new(
        "wavelogin_sessions_invalidated_total",
        "Total number of sessions destroyed by the freshness check"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wavelogin_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(PROVIDER_REQUESTS_TOTAL.clone()))
            .expect("PROVIDER_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(PROVIDER_REQUEST_DURATION_SECONDS.clone()))
            .expect("PROVIDER_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(LOGINS_TOTAL.clone()))
            .expect("LOGINS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(USERS_CREATED_TOTAL.clone()))
            .expect("USERS_CREATED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(USERS_TOTAL.clone()))
            .expect("USERS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FORCED_LOGOUTS_TOTAL.clone()))
            .expect("FORCED_LOGOUTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SESSIONS_INVALIDATED_TOTAL.clone()))
            .expect("SESSIONS_INVALIDATED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Record one outbound provider call.
pub fn observe_provider_request(endpoint: &str, status: &str, elapsed: Duration) {
    PROVIDER_REQUESTS_TOTAL
        .with_label_values(&[endpoint, status])
        .inc();
    PROVIDER_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(elapsed.as_secs_f64());
}

/// Encode every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    use prometheus::TextEncoder;

    TextEncoder::new().encode_to_string(&REGISTRY.gather())
}
