//! Relay HTTP application wiring.
//!
//! Builds the Axum router and the shared state injected into handlers.
use crate::api;
use crate::history::HistoryService;
use axum::Router;
use bunny_storage::ChannelLogStore;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChannelLogStore>,
    pub history: HistoryService,
}

impl AppState {
    pub fn new(store: Arc<dyn ChannelLogStore>) -> Self {
        Self {
            history: HistoryService::new(store.clone()),
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    Router::new()
        .route(
            "/v1/chats/history",
            axum::routing::get(api::history::chat_history),
        )
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/v1/openapi.json",
            axum::routing::get(api::system::openapi_json),
        )
        .layer(trace_layer)
        .with_state(state)
}
