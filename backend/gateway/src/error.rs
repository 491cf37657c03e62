//! HTTP mapping of the error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lessonkit_core::LlmError;
use lessonkit_logging::redact_sensitive_data;
use serde_json::json;
use tracing::{error, warn};

/// An error on its way out of a handler. Bodies are `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed; use POST")
    }
}

/// Status for an operation error, looking through operation tags.
pub fn status_for(err: &LlmError) -> StatusCode {
    match err.root() {
        LlmError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LlmError::UnknownProvider { .. }
        | LlmError::Unsupported { .. }
        | LlmError::ProviderError { .. }
        | LlmError::EmptyOutput { .. }
        | LlmError::BadJson { .. } => StatusCode::BAD_GATEWAY,
        LlmError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LlmError::UnknownSchema(_)
        | LlmError::BadSchema { .. }
        | LlmError::Internal(_)
        | LlmError::Operation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        Self::new(status_for(&err), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = redact_sensitive_data(&self.message);
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), error = %message, "Request failed");
        } else {
            warn!(status = self.status.as_u16(), error = %message, "Request rejected");
        }
        (self.status, Json(json!({ "error": message }))).into_response()
    }
}

/// Fallback for non-POST methods on operation routes.
pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}
