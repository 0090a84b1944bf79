//! Request logging middleware
//!
//! Tags every request with a UUID request id (propagated back on the
//! response) and emits one structured line per request with method, path,
//! status and latency.

use axum::{extract::Request, middleware::Next, response::Response};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::info;
use uuid::Uuid;

/// Generates a UUID v4 `x-request-id` for requests that arrive without one.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Logs one line per completed request.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    info!(
        method = %method,
        path = %path,
        request_id = %request_id,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}
