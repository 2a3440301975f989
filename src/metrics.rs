//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, Opts, Registry};
use std::time::Duration;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Inbox Metrics
    pub static ref ACTIVITIES_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_activities_received_total", "Total number of inbound activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_activities_processed_total", "Inbound activities by processing outcome"),
        &["activity_type", "outcome"]
    ).expect("metric can be created");
    pub static ref ACTIVITY_PROCESSING_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "fedibox_activity_processing_seconds",
            "Inbound activity processing duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["activity_type"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref ACTIVITYPUB_ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_activitypub_activities_sent_total", "Total number of ActivityPub activities sent"),
        &["activity_type", "status"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_federation_requests_total", "Total number of federation requests"),
        &["direction", "status"]
    ).expect("metric can be created");

    // Notification Metrics
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_notifications_total", "Total number of notifications created"),
        &["kind"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedibox_errors_total", "Total number of errors returned to peers"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED_TOTAL.clone()))
        .expect("ACTIVITIES_RECEIVED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_PROCESSED_TOTAL.clone()))
        .expect("ACTIVITIES_PROCESSED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ACTIVITY_PROCESSING_SECONDS.clone()))
        .expect("ACTIVITY_PROCESSING_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ACTIVITYPUB_ACTIVITIES_SENT.clone()))
        .expect("ACTIVITYPUB_ACTIVITIES_SENT can be registered");
    REGISTRY
        .register(Box::new(FEDERATION_REQUESTS_TOTAL.clone()))
        .expect("FEDERATION_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(NOTIFICATIONS_TOTAL.clone()))
        .expect("NOTIFICATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record how one inbound activity ended.
pub fn observe_activity(activity_type: &str, outcome: &str, elapsed: Duration) {
    ACTIVITIES_PROCESSED_TOTAL
        .with_label_values(&[activity_type, outcome])
        .inc();
    ACTIVITY_PROCESSING_SECONDS
        .with_label_values(&[activity_type])
        .observe(elapsed.as_secs_f64());
}
