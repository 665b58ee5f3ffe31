//! Chat history handler.
//!
//! # Purpose
//! Serves `GET /v1/chats/history?chat=<name>&limit=<n>`: the newest `limit`
//! messages of one channel, oldest first.
//!
//! # Key invariants
//! - An unknown channel is an empty list, not an error.
//! - A missing, zero or unparseable `limit` means the default; larger values
//!   are capped.
//!
//! # Security considerations
//! - The channel name only reaches storage through its escaped identifier.
use crate::api::error::ApiError;
use crate::api::types::{HistoryQuery, HistoryResponse};
use crate::app::AppState;
use axum::Json;
use axum::extract::{Query, State};

#[utoipa::path(
    get,
    path = "/v1/chats/history",
    tag = "chats",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Newest messages of the channel, oldest first", body = HistoryResponse),
        (status = 400, description = "Missing or invalid chat parameter", body = crate::api::types::ErrorResponse),
        (status = 500, description = "Storage failure", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn chat_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let reply = state
        .history
        .query(query.chat.as_deref(), query.limit.as_deref())
        .await?;
    Ok(Json(reply))
}
