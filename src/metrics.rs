//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("moviepolls_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "moviepolls_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Data layer Metrics
    pub static ref DATA_WRITES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("moviepolls_data_writes_total", "Total number of data layer mutations"),
        &["backend", "operation"]
    ).expect("metric can be created");

    // Poll Metrics
    pub static ref VOTES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("moviepolls_votes_total", "Total number of votes cast or retracted"),
        &["action"]
    ).expect("metric can be created");
    pub static ref NOMINATIONS_TOTAL: IntCounter = IntCounter::new(
        "moviepolls_nominations_total",
        "Total number of accepted nominations"
    ).expect("metric can be created");
    pub static ref CYCLES_CLOSED_TOTAL: IntCounter = IntCounter::new(
        "moviepolls_cycles_closed_total",
        "Total number of closed cycles"
    ).expect("metric can be created");
    pub static ref VOTES_DECAYED_TOTAL: IntCounter = IntCounter::new(
        "moviepolls_votes_decayed_total",
        "Total number of votes removed by decay"
    ).expect("metric can be created");

    // Metadata Metrics
    pub static ref METADATA_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("moviepolls_metadata_fetches_total", "Total number of metadata provider lookups"),
        &["provider", "status"]
    ).expect("metric can be created");

    // Account Metrics
    pub static ref LOGINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("moviepolls_logins_total", "Total number of login attempts"),
        &["method", "status"]
    ).expect("metric can be created");
    pub static ref PENDING_URL_KEYS: IntGauge = IntGauge::new(
        "moviepolls_pending_url_keys",
        "Current number of unconsumed single-use URL keys"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("moviepolls_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
            .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(DATA_WRITES_TOTAL.clone()))
            .expect("DATA_WRITES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(VOTES_TOTAL.clone()))
            .expect("VOTES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(NOMINATIONS_TOTAL.clone()))
            .expect("NOMINATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CYCLES_CLOSED_TOTAL.clone()))
            .expect("CYCLES_CLOSED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(VOTES_DECAYED_TOTAL.clone()))
            .expect("VOTES_DECAYED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(METADATA_FETCHES_TOTAL.clone()))
            .expect("METADATA_FETCHES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(LOGINS_TOTAL.clone()))
            .expect("LOGINS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(PENDING_URL_KEYS.clone()))
            .expect("PENDING_URL_KEYS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Count one data layer mutation.
pub fn record_write(backend: &str, operation: &str) {
    DATA_WRITES_TOTAL
        .with_label_values(&[backend, operation])
        .inc();
}
