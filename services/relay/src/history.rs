// History read path over the channel log store.
use bunny_common::{ChannelName, HistoryResponse};
use bunny_storage::{ChannelLogStore, StoreError, effective_limit};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("chat parameter is required")]
    MissingChannelParameter,
    #[error(transparent)]
    InvalidChannelName(bunny_common::Error),
    #[error("history query failed: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn ChannelLogStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn ChannelLogStore>) -> Self {
        Self { store }
    }

    /// Newest messages of `chat`, oldest first. `limit` is taken as raw
    /// request text: anything that is not a positive integer falls back to
    /// the default, and large values are capped.
    pub async fn query(
        &self,
        chat: Option<&str>,
        limit: Option<&str>,
    ) -> Result<HistoryResponse, HistoryError> {
        let chat = chat
            .filter(|chat| !chat.is_empty())
            .ok_or(HistoryError::MissingChannelParameter)?;
        let channel = ChannelName::new(chat).map_err(HistoryError::InvalidChannelName)?;
        let limit = effective_limit(parse_limit(limit));
        let messages = self.store.query(&channel, Some(limit)).await?;
        Ok(HistoryResponse {
            chat: channel.into_string(),
            messages,
        })
    }
}

fn parse_limit(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
}
