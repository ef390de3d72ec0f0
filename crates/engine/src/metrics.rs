//! Prometheus metrics for the strata engine.
//!
//! Exposes counters for request intake, job execution, published events and
//! the restoration cache. Labels carry request kinds and event types only,
//! never tenants or checksums.

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Request intake
pub static REQUESTS_CREATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "strata_requests_created_total",
            "Total number of requests created, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static REQUESTS_MERGED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "strata_requests_merged_total",
            "Total number of submissions merged into an existing request, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static REQUESTS_RETRIED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "strata_requests_retried_total",
            "Total number of errored requests reset to todo, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Jobs
pub static JOBS_SCHEDULED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("strata_jobs_scheduled_total", "Total number of jobs created, by kind"),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static JOBS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("strata_jobs_active", "Number of jobs spawned and not yet finished")
        .expect("metric creation failed")
});

pub static JOBS_CRASHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "strata_jobs_crashed_total",
        "Total number of jobs whose executor died before finishing",
    )
    .expect("metric creation failed")
});

pub static JOB_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("strata_job_duration_seconds", "Time taken to execute a job")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .expect("metric creation failed")
});

pub static REQUEST_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "strata_request_outcomes_total",
            "Total number of executed requests, by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("metric creation failed")
});

// Events
pub static EVENTS_PUBLISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "strata_events_published_total",
            "Total number of file reference events published, by type",
        ),
        &["type"],
    )
    .expect("metric creation failed")
});

// Cache
pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "strata_cache_hits_total",
        "Total number of availability checks answered by a valid cache entry",
    )
    .expect("metric creation failed")
});

pub static CACHE_ENTRIES_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "strata_cache_entries_purged_total",
        "Total number of expired cache entries purged",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent, so tests may call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_MERGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_RETRIED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOBS_SCHEDULED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOBS_ACTIVE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOBS_CRASHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUEST_OUTCOMES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENTS_PUBLISHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_ENTRIES_PURGED.clone()))
            .expect("metric registration failed");
    });
}

/// Encode the registry in the Prometheus text format.
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Helper to record the outcome of one executed request.
pub fn record_request_outcome(kind: &str, outcome: &str) {
    REQUEST_OUTCOMES.with_label_values(&[kind, outcome]).inc();
}
