//! Prometheus metrics and a tiny /metrics + /health HTTP server.

use std::sync::LazyLock;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static EXECUTION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "judge_execution_duration_seconds",
        "Wall time spent executing a submission's test cases",
    )
    .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    HistogramVec::new(opts, &["problem_id"]).expect("failed to create histogram")
});

pub static MEMORY_USAGE: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new("judge_memory_usage_kb", "Peak memory used by submissions")
        .buckets(vec![
            1024.0, 16.0 * 1024.0, 64.0 * 1024.0, 128.0 * 1024.0, 256.0 * 1024.0,
            512.0 * 1024.0, 1024.0 * 1024.0,
        ]);
    HistogramVec::new(opts, &["problem_id"]).expect("failed to create histogram")
});

pub static VERDICT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let opts = Opts::new("judge_verdict_total", "Terminal verdicts by code");
    IntCounterVec::new(opts, &["verdict"]).expect("failed to create counter")
});

pub static JOBS_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("judge_jobs_processed_total", "Total submissions judged to a terminal verdict")
        .expect("failed to create counter")
});

pub static JOBS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("judge_jobs_failed_total", "Total submissions ending in IE")
        .expect("failed to create counter")
});

pub static ACTIVE_WORKERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("judge_active_workers", "Current size of the worker pool")
        .expect("failed to create gauge")
});

pub static BUSY_WORKERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("judge_busy_workers", "Workers currently judging a submission")
        .expect("failed to create gauge")
});

pub static BREAKER_OPEN: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("judge_breaker_open", "Number of circuit breakers currently open")
        .expect("failed to create gauge")
});

pub static DLQ_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("judge_dlq_depth", "Messages currently held in the dead-letter queue")
        .expect("failed to create gauge")
});

pub fn init_metrics() {
    REGISTRY.register(Box::new(EXECUTION_DURATION.clone())).expect("register metric");
    REGISTRY.register(Box::new(MEMORY_USAGE.clone())).expect("register metric");
    REGISTRY.register(Box::new(VERDICT_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(JOBS_PROCESSED.clone())).expect("register metric");
    REGISTRY.register(Box::new(JOBS_FAILED.clone())).expect("register metric");
    REGISTRY.register(Box::new(ACTIVE_WORKERS.clone())).expect("register metric");
    REGISTRY.register(Box::new(BUSY_WORKERS.clone())).expect("register metric");
    REGISTRY.register(Box::new(BREAKER_OPEN.clone())).expect("register metric");
    REGISTRY.register(Box::new(DLQ_DEPTH.clone())).expect("register metric");
}

pub fn record_verdict(verdict: &str) {
    VERDICT_TOTAL.with_label_values(&[verdict]).inc();
}

pub fn record_execution(problem_id: i64, duration_secs: f64, memory_kb: u32) {
    let label = problem_id.to_string();
    EXECUTION_DURATION.with_label_values(&[&label]).observe(duration_secs);
    MEMORY_USAGE.with_label_values(&[&label]).observe(memory_kb as f64);
}

pub struct MetricsServer;

impl MetricsServer {
    pub async fn run(port: u16) -> anyhow::Result<()> {
        use axum::{routing::get, Router};
        use std::net::SocketAddr;

        init_metrics();

        let app = Router::new()
            .route("/metrics", get(Self::metrics_handler))
            .route("/health", get(|| async { "OK" }));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Metrics server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    async fn metrics_handler() -> String {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}
