//! Durable per-channel message logs.
//!
//! Each channel owns one append-only log addressed by its [`StorageId`]. Logs
//! are created lazily on first append and never deleted here. Reads return
//! the newest `limit` entries in ascending order: backends fetch newest-first
//! with the limit applied, then reverse.
//!
//! [`StorageId`]: bunny_common::StorageId
use async_trait::async_trait;
use bunny_common::{ChannelName, Message};
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryChannelLog;
pub use sqlite::{SqliteChannelLog, SqliteConfig};

/// Messages returned when the caller gives no limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Upper bound applied to every history query.
pub const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidChannel(#[from] bunny_common::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Resolve a caller-supplied limit. Missing or zero falls back to the default;
/// anything larger than the cap is clamped.
pub fn effective_limit(requested: Option<usize>) -> usize {
    match requested {
        Some(0) | None => DEFAULT_HISTORY_LIMIT,
        Some(limit) => limit.min(MAX_HISTORY_LIMIT),
    }
}

#[async_trait]
pub trait ChannelLogStore: Send + Sync {
    /// Create the channel's log if it does not exist. Safe to call
    /// concurrently and repeatedly.
    async fn ensure_log(&self, channel: &ChannelName) -> StoreResult<()>;

    /// Ensure the log, then append one message at its tail.
    async fn append(&self, channel: &ChannelName, message: &Message) -> StoreResult<()>;

    /// The newest `effective_limit(limit)` messages, oldest first. A channel
    /// that never received a message yields an empty vector.
    async fn query(&self, channel: &ChannelName, limit: Option<usize>)
    -> StoreResult<Vec<Message>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_applies_default_and_cap() {
        assert_eq!(effective_limit(None), DEFAULT_HISTORY_LIMIT);
        assert_eq!(effective_limit(Some(0)), DEFAULT_HISTORY_LIMIT);
        assert_eq!(effective_limit(Some(3)), 3);
        assert_eq!(effective_limit(Some(MAX_HISTORY_LIMIT)), MAX_HISTORY_LIMIT);
        assert_eq!(effective_limit(Some(10_000)), MAX_HISTORY_LIMIT);
    }
}
