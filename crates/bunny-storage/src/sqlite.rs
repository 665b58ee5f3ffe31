//! SQLite-backed channel logs.
//!
//! One table per channel, named `chat_<storage id>`. Table names are built
//! only from [`StorageId`], whose alphabet is `[a-z0-9_]`, so user input never
//! reaches an identifier position unescaped. Values are always bound.
//!
//! Rows carry an autoincrement `seq`; history is ordered by `seq`, which is
//! the order the relay appended them in. The timestamp column is indexed for
//! ad-hoc range reads but does not drive ordering.
//!
//! Database URLs may carry credentials or private paths; they are not logged.
use super::{ChannelLogStore, StoreError, StoreResult, effective_limit};
use async_trait::async_trait;
use bunny_common::{ChannelName, Message, StorageId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl SqliteConfig {
    /// A private in-memory database, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout_ms: 5_000,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

pub struct SqliteChannelLog {
    pool: SqlitePool,
    durable: bool,
    ensured: RwLock<HashSet<StorageId>>,
}

#[derive(FromRow)]
struct LogRow {
    username: String,
    body: String,
    timestamp: DateTime<Utc>,
}

impl SqliteChannelLog {
    pub async fn connect(config: &SqliteConfig) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let mut pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms));
        // Every connection to `:memory:` opens its own database, so pin the
        // pool to a single connection that is never recycled.
        if config.is_in_memory() {
            pool = pool
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool.connect_with(options).await?;
        tracing::debug!(
            in_memory = config.is_in_memory(),
            max_connections = config.max_connections,
            "sqlite pool ready"
        );
        Ok(Self {
            pool,
            durable: !config.is_in_memory(),
            ensured: RwLock::new(HashSet::new()),
        })
    }

    async fn table_exists(&self, id: &StorageId) -> StoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(id.table_name())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Channels that currently have a log table, decoded from table names.
    pub async fn channels(&self) -> StoreResult<Vec<ChannelName>> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'chat\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut channels = Vec::with_capacity(tables.len());
        for table in tables {
            match StorageId::from_table_name(&table).and_then(|id| id.decode()) {
                Ok(channel) => channels.push(channel),
                Err(err) => tracing::debug!(table = %table, error = %err, "skipping foreign table"),
            }
        }
        Ok(channels)
    }
}

#[async_trait]
impl ChannelLogStore for SqliteChannelLog {
    async fn ensure_log(&self, channel: &ChannelName) -> StoreResult<()> {
        let id = channel.storage_id();
        if self.ensured.read().await.contains(&id) {
            return Ok(());
        }
        let table = id.table_name();
        let create_table = format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                body TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )"#
        );
        let create_index = format!(
            r#"CREATE INDEX IF NOT EXISTS "{}" ON "{table}" (timestamp)"#,
            id.timestamp_index_name()
        );
        sqlx::query(&create_table).execute(&self.pool).await?;
        sqlx::query(&create_index).execute(&self.pool).await?;
        tracing::debug!(channel = %channel, table = %table, "channel log ready");
        self.ensured.write().await.insert(id);
        Ok(())
    }

    async fn append(&self, channel: &ChannelName, message: &Message) -> StoreResult<()> {
        self.ensure_log(channel).await?;
        let sql = format!(
            r#"INSERT INTO "{}" (username, body, timestamp) VALUES (?, ?, ?)"#,
            channel.storage_id().table_name()
        );
        sqlx::query(&sql)
            .bind(&message.sender)
            .bind(&message.body)
            .bind(message.timestamp)
            .execute(&self.pool)
            .await?;
        metrics::counter!("bunny_log_appends_total", "backend" => "sqlite").increment(1);
        Ok(())
    }

    async fn query(
        &self,
        channel: &ChannelName,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Message>> {
        metrics::counter!("bunny_log_queries_total", "backend" => "sqlite").increment(1);
        let id = channel.storage_id();
        if !self.table_exists(&id).await? {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(effective_limit(limit))
            .map_err(|err| StoreError::Unexpected(err.into()))?;
        let sql = format!(
            r#"SELECT username, body, timestamp FROM "{}" ORDER BY seq DESC LIMIT ?"#,
            id.table_name()
        );
        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .rev()
            .map(|row| Message {
                sender: row.username,
                body: row.body,
                timestamp: row.timestamp,
                chat_name: None,
            })
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        self.durable
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Arc;

    async fn store() -> SqliteChannelLog {
        SqliteChannelLog::connect(&SqliteConfig::in_memory())
            .await
            .expect("connect")
    }

    fn channel(name: &str) -> ChannelName {
        ChannelName::new(name).expect("channel")
    }

    fn message(n: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Message::new("alice", format!("m{n}"), base + ChronoDuration::seconds(n))
            .expect("message")
    }

    fn bodies(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.body.clone()).collect()
    }

    #[tokio::test]
    async fn round_trip_preserves_fields_and_order() {
        let store = store().await;
        let general = channel("general");
        for n in 1..=4 {
            store.append(&general, &message(n)).await.expect("append");
        }
        let got = store.query(&general, None).await.expect("query");
        assert_eq!(bodies(&got), ["m1", "m2", "m3", "m4"]);
        assert_eq!(got[0], message(1));
    }

    #[tokio::test]
    async fn limit_returns_newest_oldest_first() {
        let store = store().await;
        let general = channel("general");
        for n in 1..=10 {
            store.append(&general, &message(n)).await.expect("append");
        }
        let got = store.query(&general, Some(3)).await.expect("query");
        assert_eq!(bodies(&got), ["m8", "m9", "m10"]);
    }

    #[tokio::test]
    async fn order_follows_arrival_not_timestamp() {
        let store = store().await;
        let general = channel("general");
        store.append(&general, &message(5)).await.expect("append");
        store.append(&general, &message(1)).await.expect("append");
        let got = store.query(&general, None).await.expect("query");
        assert_eq!(bodies(&got), ["m5", "m1"]);
    }

    #[tokio::test]
    async fn unknown_channel_is_empty_and_creates_nothing() {
        let store = store().await;
        let got = store.query(&channel("nobody"), Some(5)).await.expect("query");
        assert!(got.is_empty());
        assert!(store.channels().await.expect("channels").is_empty());
    }

    #[tokio::test]
    async fn ensured_but_empty_channel_is_empty() {
        let store = store().await;
        store.ensure_log(&channel("quiet")).await.expect("ensure");
        store.ensure_log(&channel("quiet")).await.expect("ensure again");
        assert!(
            store
                .query(&channel("quiet"), None)
                .await
                .expect("query")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn similar_names_do_not_share_tables() {
        let store = store().await;
        store
            .append(&channel("team.chat"), &message(1))
            .await
            .expect("append");
        store
            .append(&channel("team_chat"), &message(2))
            .await
            .expect("append");
        store
            .append(&channel("Team.chat"), &message(3))
            .await
            .expect("append");
        let dotted = store.query(&channel("team.chat"), None).await.expect("query");
        let underscored = store.query(&channel("team_chat"), None).await.expect("query");
        assert_eq!(bodies(&dotted), ["m1"]);
        assert_eq!(bodies(&underscored), ["m2"]);
        let mut names: Vec<String> = store
            .channels()
            .await
            .expect("channels")
            .into_iter()
            .map(ChannelName::into_string)
            .collect();
        names.sort();
        assert_eq!(names, ["Team.chat", "team.chat", "team_chat"]);
    }

    #[tokio::test]
    async fn hostile_channel_name_stays_inside_its_table() {
        let store = store().await;
        store
            .append(&channel("general"), &message(1))
            .await
            .expect("append");
        let hostile = channel(r#"x"; DROP TABLE "chat_general"; --"#);
        store.append(&hostile, &message(2)).await.expect("append");
        let general = store.query(&channel("general"), None).await.expect("query");
        assert_eq!(bodies(&general), ["m1"]);
        let got = store.query(&hostile, None).await.expect("query");
        assert_eq!(bodies(&got), ["m2"]);
    }

    #[tokio::test]
    async fn concurrent_appends_all_land() {
        let store = Arc::new(store().await);
        let appends = (1..=20).map(|n| {
            let store = store.clone();
            async move { store.append(&channel("busy"), &message(n)).await }
        });
        for result in futures::future::join_all(appends).await {
            result.expect("append");
        }
        let got = store.query(&channel("busy"), Some(100)).await.expect("query");
        assert_eq!(got.len(), 20);
    }

    #[tokio::test]
    async fn health_check_and_metadata() {
        let store = store().await;
        store.health_check().await.expect("health");
        assert_eq!(store.backend_name(), "sqlite");
        assert!(!store.is_durable());
        store.close().await;
        assert!(store.health_check().await.is_err());
    }
}
