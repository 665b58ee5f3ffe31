//! OpenAPI document for the relay API.
use crate::api::{
    history, system,
    types::{ErrorResponse, HealthStatus, HistoryResponse, Message},
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "bunny-relay",
        version = "v1",
        description = "Chat relay history API"
    ),
    paths(history::chat_history, system::system_health),
    components(schemas(HistoryResponse, Message, HealthStatus, ErrorResponse)),
    tags(
        (name = "chats", description = "Chat history"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_history_and_health() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/chats/history"));
        assert!(doc.paths.paths.contains_key("/v1/system/health"));
        let schemas = doc.components.expect("components").schemas;
        assert!(schemas.contains_key("HistoryResponse"));
        assert!(schemas.contains_key("Message"));
    }
}
