// HTTP reader for the relay's history endpoint.
use crate::{ClientError, Result};
use bunny_common::HistoryResponse;
use serde::Deserialize;

const HISTORY_PATH: &str = "/v1/chats/history";

#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Fetch the newest messages of `chat`, oldest first. The server applies
    /// its default when `limit` is `None` and caps large values.
    pub async fn fetch(&self, chat: &str, limit: Option<usize>) -> Result<HistoryResponse> {
        let url = format!("{}{HISTORY_PATH}", self.base_url);
        let mut request = self.http.get(url).query(&[("chat", chat)]);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let (code, message) = match response.json::<ErrorBody>().await {
                Ok(body) => (body.code, body.message),
                Err(_) => ("unknown".to_string(), status.to_string()),
            };
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                code,
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use bunny_common::Message;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    async fn history(Query(params): Query<HashMap<String, String>>) -> axum::response::Response {
        let Some(chat) = params.get("chat").filter(|chat| !chat.is_empty()) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "code": "missing_channel",
                    "message": "chat query parameter is required",
                })),
            )
                .into_response();
        };
        let limit: usize = params
            .get("limit")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(2);
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let messages = (0..limit)
            .map(|n| Message::new("alice", format!("{chat}#{n}"), ts).expect("message"))
            .collect();
        Json(HistoryResponse {
            chat: chat.clone(),
            messages,
        })
        .into_response()
    }

    async fn serve() -> String {
        let app = Router::new().route(HISTORY_PATH, get(history));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn fetch_encodes_channel_and_limit() {
        let client = HistoryClient::new(serve().await);
        let reply = client.fetch("team chat&x=1", Some(3)).await.expect("fetch");
        assert_eq!(reply.chat, "team chat&x=1");
        assert_eq!(reply.messages.len(), 3);
        assert_eq!(reply.messages[0].body, "team chat&x=1#0");
    }

    #[tokio::test]
    async fn fetch_without_limit_uses_server_default() {
        let client = HistoryClient::new(serve().await);
        let reply = client.fetch("general", None).await.expect("fetch");
        assert_eq!(reply.messages.len(), 2);
    }

    #[tokio::test]
    async fn rejection_carries_error_code() {
        let client = HistoryClient::new(serve().await);
        let err = client.fetch("", None).await.expect_err("rejected");
        match err {
            ClientError::Rejected { status, code, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code, "missing_channel");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
