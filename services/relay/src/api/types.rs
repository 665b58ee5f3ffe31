//! HTTP API request/response types.
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub use bunny_common::{HistoryResponse, Message};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub storage_backend: String,
    pub durable: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

/// Query string of the history endpoint. Both values stay raw text so that
/// a malformed `limit` falls back to the default instead of failing the
/// request.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Channel name.
    pub chat: Option<String>,
    /// Maximum number of messages; defaults to 50 and is capped at 500.
    pub limit: Option<String>,
}
