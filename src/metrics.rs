//! Prometheus metrics for HTTP traffic, training runs and AI processes.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all tagtrain metrics
const PREFIX: &str = "tagtrain";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Training
    pub static ref TRAINING_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_training_runs_total"), "Training runs by outcome"),
        &["outcome"]
    ).expect("Failed to create training_runs_total metric");

    pub static ref TRAINING_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_training_duration_seconds"),
            "Duration of training runs in seconds"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["outcome"]
    ).expect("Failed to create training_duration_seconds metric");

    // Prediction routing
    pub static ref PREDICTION_ROUTES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_prediction_routes_total"), "Predictions by routing path"),
        &["path"]
    ).expect("Failed to create prediction_routes_total metric");

    // AI processes
    pub static ref AI_PROCESS_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ai_process_runs_total"), "AI process runs by task and outcome"),
        &["task", "outcome"]
    ).expect("Failed to create ai_process_runs_total metric");

    pub static ref AI_PROCESS_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_ai_process_duration_seconds"),
            "AI process run time in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["task"]
    ).expect("Failed to create ai_process_duration_seconds metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TRAINING_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRAINING_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PREDICTION_ROUTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(AI_PROCESS_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(AI_PROCESS_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_training_run(outcome: &str, duration: Duration) {
    TRAINING_RUNS_TOTAL.with_label_values(&[outcome]).inc();
    TRAINING_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

pub fn record_prediction_route(path: &str) {
    PREDICTION_ROUTES_TOTAL.with_label_values(&[path]).inc();
}

pub fn record_ai_process(task: &str, outcome: &str, duration: Duration) {
    AI_PROCESS_RUNS_TOTAL
        .with_label_values(&[task, outcome])
        .inc();
    AI_PROCESS_DURATION_SECONDS
        .with_label_values(&[task])
        .observe(duration.as_secs_f64());
}

/// Collapses ids in paths so per-track URLs share one label.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let looks_like_id = uuid::Uuid::parse_str(segment).is_ok()
                || (!segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()));
            if looks_like_id {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok());
            if let Some(kb) = rss_kb {
                PROCESS_MEMORY_BYTES.set(kb * 1024.0);
            }
        }
    }
}

/// Renders every registered metric in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
