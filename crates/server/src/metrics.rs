//! Prometheus metrics for the storage service.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no artifact names, only aggregate counts; restrict the
//! endpoint to scraper networks at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_uploads_started_total",
        "Total number of archive uploads started",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_uploads_completed_total",
        "Total number of archive uploads stored successfully",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parcel_upload_errors_total",
            "Total upload failures by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_bytes_uploaded_total",
        "Total bytes accepted by archive uploads",
    )
    .expect("metric creation failed")
});

pub static DIGEST_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_digest_mismatches_total",
        "Total uploads rejected because the sha256 header did not match",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_upload_duration_seconds",
            "Time taken to receive and store an archive",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

pub static ACTIVE_UPLOADS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "parcel_active_uploads",
        "Current number of uploads receiving bytes",
    )
    .expect("metric creation failed")
});

// Read path
pub static DOWNLOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_downloads_total",
        "Total number of archive downloads started",
    )
    .expect("metric creation failed")
});

pub static EVENT_STREAMS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "parcel_event_streams_active",
        "Current number of open status event streams",
    )
    .expect("metric creation failed")
});

// Pruner metrics
pub static PRUNE_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("parcel_prune_runs_total", "Total number of pruner sweeps")
        .expect("metric creation failed")
});

pub static PRUNED_ARTIFACTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_pruned_artifacts_total",
        "Total number of unreferenced artifacts deleted by the pruner",
    )
    .expect("metric creation failed")
});

pub static PRUNE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_prune_errors_total",
        "Total errors encountered during pruner sweeps",
    )
    .expect("metric creation failed")
});

pub static PRUNE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_prune_duration_seconds",
            "Time taken by a pruner sweep",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedded routers may call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_STARTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DIGEST_MISMATCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENT_STREAMS_ACTIVE.clone()))
            .expect("metric registration failed");

        // Pruner
        REGISTRY
            .register(Box::new(PRUNE_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PRUNED_ARTIFACTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PRUNE_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PRUNE_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
