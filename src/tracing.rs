//! Request-scoped tracing helpers.
//!
//! Every request is tagged with a request id that rides a tokio task-local
//! so error responses and log lines can be correlated without threading the
//! id through every call site.

use axum::http::{HeaderValue, Request};
use std::future::Future;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(format!("req-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: RequestId;
}

/// Runs `future` with the given request id in scope.
pub async fn scope_request_id<Fut, R>(request_id: RequestId, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    CURRENT_REQUEST_ID.scope(request_id, future).await
}

/// The request id for the current task, if one is in scope.
pub fn current_request_id() -> Option<RequestId> {
    CURRENT_REQUEST_ID.try_with(|rid| rid.clone()).ok()
}

/// Middleware that assigns (or propagates) a request id, scopes it for the
/// duration of the request, and echoes it on the response.
pub async fn request_id_middleware(
    request: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(RequestId::new)
        .unwrap_or_else(RequestId::generate);

    let echo = request_id.clone();
    let mut response = scope_request_id(request_id, next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(echo.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// HTTP tracing layer shared by the whole router.
pub fn configure_http_tracing() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}
