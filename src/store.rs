use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DbConfig;

pub type DbPool = Pool<Postgres>;

/// A conversation between one unordered pair of users. The pair is stored
/// normalized (`participant_lo <= participant_hi`) so `{A,B}` and `{B,A}`
/// resolve to the same row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub participant_lo: String,
    pub participant_hi: String,
    pub created_at: i64,
}

impl Channel {
    pub fn includes(&self, user: &str) -> bool {
        self.participant_lo == user || self.participant_hi == user
    }
}

/// One persisted chat message. Also the outbound wire frame: recipients
/// receive this record serialized as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    /// Logical send time, seconds since the Unix epoch
    pub sent_at: i64,
}

/// Message fields as known before persistence assigns an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub sent_at: i64,
}

/// Orders a participant pair lexicographically for storage and lookup.
pub fn normalize_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Durable store contract for channels and messages.
///
/// The create path must be race-free: two concurrent `resolve_channel` calls
/// for the same pair must return the same channel. The Postgres
/// implementation enforces this with a unique constraint and an idempotent
/// upsert; the in-memory implementation serializes behind a mutex.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Read-only lookup of the channel for a pair. Never creates.
    async fn channel_for_pair(&self, a: &str, b: &str) -> Result<Option<Channel>>;

    /// Returns the channel for a pair, creating it on first use.
    async fn resolve_channel(&self, a: &str, b: &str) -> Result<Channel>;

    /// Persists a message and returns the stored record.
    async fn insert_message(&self, new: NewMessage) -> Result<StoredMessage>;

    /// All messages in a channel, ascending by send time, insertion order on
    /// equal timestamps.
    async fn messages_for_channel(&self, channel_id: Uuid) -> Result<Vec<StoredMessage>>;
}

pub async fn create_pool(database_url: &str, config: &DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(pool)
}

/// PostgreSQL implementation of [`ChatStore`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn channel_for_pair(&self, a: &str, b: &str) -> Result<Option<Channel>> {
        let (lo, hi) = normalize_pair(a, b);
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, participant_lo, participant_hi, created_at
            FROM channels
            WHERE participant_lo = $1 AND participant_hi = $2
            "#,
        )
        .bind(lo)
        .bind(hi)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up channel")?;

        Ok(channel)
    }

    async fn resolve_channel(&self, a: &str, b: &str) -> Result<Channel> {
        let (lo, hi) = normalize_pair(a, b);
        // Idempotent upsert: on a concurrent first contact the unique pair
        // constraint collapses both inserts into one row, and the no-op
        // DO UPDATE lets RETURNING yield the surviving record either way.
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            INSERT INTO channels (id, participant_lo, participant_hi, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (participant_lo, participant_hi)
                DO UPDATE SET participant_lo = EXCLUDED.participant_lo
            RETURNING id, participant_lo, participant_hi, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(lo)
        .bind(hi)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .context("Failed to resolve channel")?;

        Ok(channel)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<StoredMessage> {
        let message = sqlx::query_as::<_, StoredMessage>(
            r#"
            INSERT INTO messages (id, channel_id, sender, receiver, content, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, channel_id, sender, receiver, content, sent_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.channel_id)
        .bind(&new.sender)
        .bind(&new.receiver)
        .bind(&new.content)
        .bind(new.sent_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert message")?;

        Ok(message)
    }

    async fn messages_for_channel(&self, channel_id: Uuid) -> Result<Vec<StoredMessage>> {
        let messages = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT id, channel_id, sender, receiver, content, sent_at
            FROM messages
            WHERE channel_id = $1
            ORDER BY sent_at ASC, seq ASC
            "#,
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch channel messages")?;

        Ok(messages)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

pub mod memory {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        channels: Vec<Channel>,
        messages: Vec<StoredMessage>,
    }

    /// In-memory [`ChatStore`] for tests and local development. A single
    /// mutex serializes the create path, which is one of the two race-closing
    /// strategies the contract allows.
    #[derive(Default)]
    pub struct MemStore {
        inner: Mutex<Inner>,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn channel_count(&self) -> usize {
            self.inner.lock().await.channels.len()
        }

        pub async fn message_count(&self) -> usize {
            self.inner.lock().await.messages.len()
        }
    }

    #[async_trait]
    impl ChatStore for MemStore {
        async fn channel_for_pair(&self, a: &str, b: &str) -> Result<Option<Channel>> {
            let (lo, hi) = normalize_pair(a, b);
            let inner = self.inner.lock().await;
            Ok(inner
                .channels
                .iter()
                .find(|c| c.participant_lo == lo && c.participant_hi == hi)
                .cloned())
        }

        async fn resolve_channel(&self, a: &str, b: &str) -> Result<Channel> {
            let (lo, hi) = normalize_pair(a, b);
            let mut inner = self.inner.lock().await;
            if let Some(existing) = inner
                .channels
                .iter()
                .find(|c| c.participant_lo == lo && c.participant_hi == hi)
            {
                return Ok(existing.clone());
            }
            let channel = Channel {
                id: Uuid::new_v4(),
                participant_lo: lo.to_string(),
                participant_hi: hi.to_string(),
                created_at: chrono::Utc::now().timestamp(),
            };
            inner.channels.push(channel.clone());
            Ok(channel)
        }

        async fn insert_message(&self, new: NewMessage) -> Result<StoredMessage> {
            let message = StoredMessage {
                id: Uuid::new_v4(),
                channel_id: new.channel_id,
                sender: new.sender,
                receiver: new.receiver,
                content: new.content,
                sent_at: new.sent_at,
            };
            self.inner.lock().await.messages.push(message.clone());
            Ok(message)
        }

        async fn messages_for_channel(&self, channel_id: Uuid) -> Result<Vec<StoredMessage>> {
            let inner = self.inner.lock().await;
            let mut messages: Vec<StoredMessage> = inner
                .messages
                .iter()
                .filter(|m| m.channel_id == channel_id)
                .cloned()
                .collect();
            // Stable sort keeps insertion order for equal timestamps
            messages.sort_by_key(|m| m.sent_at);
            Ok(messages)
        }
    }

    /// Store whose write operations always fail. Used to exercise the
    /// "transient store failure" paths.
    pub struct FailingStore;

    #[async_trait]
    impl ChatStore for FailingStore {
        async fn channel_for_pair(&self, _a: &str, _b: &str) -> Result<Option<Channel>> {
            anyhow::bail!("store unavailable")
        }

        async fn resolve_channel(&self, _a: &str, _b: &str) -> Result<Channel> {
            anyhow::bail!("store unavailable")
        }

        async fn insert_message(&self, _new: NewMessage) -> Result<StoredMessage> {
            anyhow::bail!("store unavailable")
        }

        async fn messages_for_channel(&self, _channel_id: Uuid) -> Result<Vec<StoredMessage>> {
            anyhow::bail!("store unavailable")
        }
    }
}
