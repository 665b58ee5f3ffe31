//! In-memory channel logs.
//!
//! Not durable: every log is lost on restart. Used for local development,
//! tests, and deployments that only need live relay without history across
//! restarts.
use super::{ChannelLogStore, StoreResult, effective_limit};
use async_trait::async_trait;
use bunny_common::{ChannelName, Message, StorageId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryChannelLog {
    logs: RwLock<HashMap<StorageId, Vec<Message>>>,
}

impl InMemoryChannelLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn channel_count(&self) -> usize {
        self.logs.read().await.len()
    }
}

#[async_trait]
impl ChannelLogStore for InMemoryChannelLog {
    async fn ensure_log(&self, channel: &ChannelName) -> StoreResult<()> {
        self.logs
            .write()
            .await
            .entry(channel.storage_id())
            .or_default();
        Ok(())
    }

    async fn append(&self, channel: &ChannelName, message: &Message) -> StoreResult<()> {
        self.logs
            .write()
            .await
            .entry(channel.storage_id())
            .or_default()
            .push(message.clone());
        metrics::counter!("bunny_log_appends_total", "backend" => "memory").increment(1);
        Ok(())
    }

    async fn query(
        &self,
        channel: &ChannelName,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Message>> {
        metrics::counter!("bunny_log_queries_total", "backend" => "memory").increment(1);
        let limit = effective_limit(limit);
        let logs = self.logs.read().await;
        let Some(log) = logs.get(&channel.storage_id()) else {
            return Ok(Vec::new());
        };
        let mut newest: Vec<Message> = log.iter().rev().take(limit).cloned().collect();
        newest.reverse();
        Ok(newest)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
