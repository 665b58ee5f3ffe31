//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Every handler error is an [`ApiError`]: an HTTP status plus a JSON body
//! with a stable `code`.
//!
//! # Where it fits in the relay
//! History and system handlers return these, and [`HistoryError`] converts
//! into them so storage failures map onto HTTP responses in one place.
//!
//! # Key invariants and assumptions
//! - `missing_channel` and `invalid_channel` are 400; `internal` is 500.
//! - Status codes must align with the error category.
//!
//! # Security considerations
//! - Internal errors log details server-side but return generic messages.
//! - Request IDs are optional; avoid leaking sensitive details in messages.
use crate::api::types::ErrorResponse;
use crate::history::HistoryError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// 400 with a caller-chosen code.
pub fn api_bad_request(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, code, message)
}

/// 500 for a failure whose details must stay server-side.
pub fn api_internal(message: &str, err: &dyn std::error::Error) -> ApiError {
    tracing::error!(error = %err, "relay request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::MissingChannelParameter => {
                api_bad_request("missing_channel", "chat query parameter is required")
            }
            HistoryError::InvalidChannelName(err) => {
                api_bad_request("invalid_channel", &err.to_string())
            }
            HistoryError::Storage(err) => api_internal("failed to load chat history", &err),
        }
    }
}
