// ============================================================================
// Prometheus Metrics
// ============================================================================
//
// - stocktake_http_request_duration_seconds  (method, path, status)
// - stocktake_http_requests_total            (method, path, status)
// - stocktake_auth_failures_total            (reason)
// - stocktake_erp_queries_total              (outcome)
// - stocktake_loaded_items_total             (outcome)
// - stocktake_sync_items_total               (outcome)
//
// GET /metrics serves the text exposition format.
//
// ============================================================================

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder};
use std::time::Instant;

lazy_static! {
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "stocktake_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "stocktake_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    ).unwrap();

    pub static ref AUTH_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "stocktake_auth_failures_total",
        "Total number of authentication failures",
        &["reason"]
    ).unwrap();

    /// ERP query executions by outcome (success, failure)
    pub static ref ERP_QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "stocktake_erp_queries_total",
        "Total number of queries executed against ERP connectors",
        &["outcome"]
    ).unwrap();

    /// Loader upserts by outcome (inserted, updated, failed, dropped)
    pub static ref LOADED_ITEMS_TOTAL: CounterVec = register_counter_vec!(
        "stocktake_loaded_items_total",
        "Count items processed by the ERP loader",
        &["outcome"]
    ).unwrap();

    /// Write-back item outcomes (synced, failed)
    pub static ref SYNC_ITEMS_TOTAL: CounterVec = register_counter_vec!(
        "stocktake_sync_items_total",
        "Items written back to the ERP",
        &["outcome"]
    ).unwrap();
}

/// Replaces UUID and numeric path segments so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    let normalized: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if (segment.len() == 36 && segment.contains('-')) || segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect();

    format!("/{}", normalized.join("/"))
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path, &status])
        .observe(duration.as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();

    tracing::debug!(
        target: "metrics",
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %duration.as_millis(),
        "HTTP request completed"
    );

    response
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

pub fn record_auth_failure(reason: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    tracing::warn!(target: "security", reason = %reason, "Authentication failure recorded");
}

pub fn record_erp_query(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    ERP_QUERIES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_loaded_items(outcome: &str, count: usize) {
    LOADED_ITEMS_TOTAL.with_label_values(&[outcome]).inc_by(count as f64);
}

pub fn record_sync_items(synced: usize, failed: usize) {
    SYNC_ITEMS_TOTAL.with_label_values(&["synced"]).inc_by(synced as f64);
    SYNC_ITEMS_TOTAL.with_label_values(&["failed"]).inc_by(failed as f64);
}
