//! Prometheus metrics for monitoring and alerting.
//!
//! NOTE: user ids never appear in metric labels to prevent high-cardinality
//! explosion.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Request metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "cortex_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "endpoint", "status"]
    ).unwrap();

    /// Total HTTP requests
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cortex_http_requests_total", "Total HTTP requests"),
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Ingest metrics
    // ============================================================================

    /// Ingest jobs by terminal status (plus accepted/deduplicated)
    pub static ref INGEST_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cortex_ingest_jobs_total", "Ingest jobs by lifecycle outcome"),
        &["status"]
    ).unwrap();

    /// End-to-end ingest job duration
    pub static ref INGEST_JOB_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cortex_ingest_job_duration_seconds",
            "Ingest job execution duration"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0])
    ).unwrap();

    /// Chunk outcomes inside ingest jobs
    pub static ref INGEST_CHUNKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cortex_ingest_chunks_total", "Chunk outcomes during ingestion"),
        &["outcome"] // created / updated / skipped / failed
    ).unwrap();

    /// Queued jobs awaiting a worker
    pub static ref JOB_QUEUE_DEPTH: IntGauge = IntGauge::new(
        "cortex_job_queue_depth",
        "Jobs accepted but not yet picked up"
    ).unwrap();

    /// Jobs currently executing
    pub static ref ACTIVE_JOBS: IntGauge = IntGauge::new(
        "cortex_active_jobs",
        "Ingest jobs currently running"
    ).unwrap();

    // ============================================================================
    // Retrieval metrics
    // ============================================================================

    /// Context retrieval duration (search + rank + cutoff)
    pub static ref CONTEXT_RETRIEVE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cortex_context_retrieve_duration_seconds",
            "Context retrieval duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0])
    ).unwrap();

    /// Evidence items returned per context call
    pub static ref CONTEXT_RETRIEVE_RESULTS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cortex_context_retrieve_results",
            "Evidence items returned per context call"
        )
        .buckets(vec![0.0, 1.0, 3.0, 5.0, 10.0, 25.0, 50.0])
    ).unwrap();

    // ============================================================================
    // Adapter metrics
    // ============================================================================

    /// Embedding generation operations
    pub static ref EMBEDDING_GENERATE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cortex_embedding_generate_total", "Total embedding generations"),
        &["mode", "result"] // mode: "gemini" or "hashing"
    ).unwrap();

    /// Embedding generation duration
    pub static ref EMBEDDING_GENERATE_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "cortex_embedding_generate_duration_seconds",
            "Embedding generation duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["mode"]
    ).unwrap();

    // ============================================================================
    // Error metrics
    // ============================================================================

    /// Total errors by wire code
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cortex_errors_total", "Total errors by code"),
        &["code", "endpoint"]
    ).unwrap();
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(INGEST_JOBS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(INGEST_JOB_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(INGEST_CHUNKS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(JOB_QUEUE_DEPTH.clone()))?;
    METRICS_REGISTRY.register(Box::new(ACTIVE_JOBS.clone()))?;

    METRICS_REGISTRY.register(Box::new(CONTEXT_RETRIEVE_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(CONTEXT_RETRIEVE_RESULTS.clone()))?;

    METRICS_REGISTRY.register(Box::new(EMBEDDING_GENERATE_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(EMBEDDING_GENERATE_DURATION.clone()))?;

    METRICS_REGISTRY.register(Box::new(ERRORS_TOTAL.clone()))?;

    Ok(())
}

/// Helper to time operations with histogram (RAII pattern)
#[allow(unused)] // Public API utility for metrics consumers
pub struct Timer {
    histogram: Histogram,
    start: std::time::Instant,
}

#[allow(unused)] // Public API utility
impl Timer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
