//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "genflow_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "genflow_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "genflow_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "genflow_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "genflow_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "genflow_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "genflow_ws_messages_received_total";

    // Job metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "genflow_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "genflow_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "genflow_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "genflow_jobs_cancelled_total";
    pub const REGISTRY_JOBS: &str = "genflow_registry_jobs";

    // Submission coalescing metrics
    pub const CACHE_HITS_TOTAL: &str = "genflow_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "genflow_cache_misses_total";
    pub const SUBMISSIONS_COALESCED_TOTAL: &str = "genflow_submissions_coalesced_total";

    // Webhook metrics
    pub const WEBHOOKS_RECEIVED_TOTAL: &str = "genflow_webhooks_received_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "genflow_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_CONNECTIONS_TOTAL, &labels).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record WebSocket message sent.
pub fn record_ws_message_sent(endpoint: &str, message_type: &str) {
    let labels = [
        ("endpoint", endpoint.to_string()),
        ("type", message_type.to_string()),
    ];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

/// Record WebSocket message received.
pub fn record_ws_message_received(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_MESSAGES_RECEIVED, &labels).increment(1);
}

/// Record job submitted to a provider.
pub fn record_job_submitted(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record job completed.
pub fn record_job_completed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

/// Record job failed.
pub fn record_job_failed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record job cancelled.
pub fn record_job_cancelled(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_CANCELLED_TOTAL, &labels).increment(1);
}

/// Update tracked-job gauge.
pub fn set_registry_jobs(count: u64) {
    gauge!(names::REGISTRY_JOBS).set(count as f64);
}

/// Record result cache hit.
pub fn record_cache_hit(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::CACHE_HITS_TOTAL, &labels).increment(1);
}

/// Record result cache miss.
pub fn record_cache_miss(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::CACHE_MISSES_TOTAL, &labels).increment(1);
}

/// Record a submit coalesced onto an in-flight request.
pub fn record_submission_coalesced(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::SUBMISSIONS_COALESCED_TOTAL, &labels).increment(1);
}

/// Record provider webhook received.
pub fn record_webhook_received(kind: &str, outcome: &str) {
    let labels = [
        ("kind", kind.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::WEBHOOKS_RECEIVED_TOTAL, &labels).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    // Replace UUIDs and numeric IDs with placeholders
    let path = regex_lite::Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .unwrap()
        .replace_all(path, ":job_id");
    let path = regex_lite::Regex::new(r"/[0-9]+(/|$)")
        .unwrap()
        .replace_all(&path, "/:id$1");
    // Normalize webhook provider kinds
    let path = regex_lite::Regex::new(r"/webhooks/[a-zA-Z0-9_-]+")
        .unwrap()
        .replace_all(&path, "/webhooks/:kind");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    // Increment in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    // Decrement in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/jobs/550e8400-e29b-41d4-a716-446655440000"),
            "/api/jobs/:job_id"
        );
        assert_eq!(
            sanitize_path("/api/jobs/550e8400-e29b-41d4-a716-446655440000/cancel"),
            "/api/jobs/:job_id/cancel"
        );
        assert_eq!(
            sanitize_path("/webhooks/image_generation"),
            "/webhooks/:kind"
        );
        assert_eq!(sanitize_path("/api/jobs"), "/api/jobs");
    }
}
