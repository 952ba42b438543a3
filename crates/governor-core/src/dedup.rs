//! Processed-message registry: consumer-scoped dedup so that handlers have
//! exactly-once effect over an at-least-once bus.

use crate::error::DedupError;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;

#[async_trait]
pub trait ProcessedRegistry: Send + Sync {
    /// Atomically records `(consumer, message_id)` as processed, returning
    /// `true` only if this call was the one that inserted the row. Callers
    /// must check this before performing any side effect.
    async fn try_mark_processed(&self, consumer: &str, message_id: &str) -> Result<bool, DedupError>;

    async fn is_processed(&self, consumer: &str, message_id: &str) -> Result<bool, DedupError>;

    /// Unconditionally records the pair as processed; used when the caller
    /// has already established via `is_processed` that this is the first
    /// time and wants to separate the check from the record for logging.
    async fn mark_processed(&self, consumer: &str, message_id: &str) -> Result<(), DedupError>;
}

pub struct PgProcessedRegistry {
    pool: PgPool,
}

impl PgProcessedRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedRegistry for PgProcessedRegistry {
    async fn try_mark_processed(&self, consumer: &str, message_id: &str) -> Result<bool, DedupError> {
        let result = sqlx::query(
            "INSERT INTO processed_messages (consumer_name, message_id, processed_at) \
             VALUES ($1, $2, now()) ON CONFLICT (consumer_name, message_id) DO NOTHING",
        )
        .bind(consumer)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_processed(&self, consumer: &str, message_id: &str) -> Result<bool, DedupError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM processed_messages WHERE consumer_name = $1 AND message_id = $2",
        )
        .bind(consumer)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, consumer: &str, message_id: &str) -> Result<(), DedupError> {
        sqlx::query(
            "INSERT INTO processed_messages (consumer_name, message_id, processed_at) \
             VALUES ($1, $2, now()) ON CONFLICT (consumer_name, message_id) DO NOTHING",
        )
        .bind(consumer)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory `ProcessedRegistry` for unit tests.
#[derive(Default)]
pub struct MemoryProcessedRegistry {
    seen: parking_lot::Mutex<HashSet<(String, String)>>,
}

impl MemoryProcessedRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedRegistry for MemoryProcessedRegistry {
    async fn try_mark_processed(&self, consumer: &str, message_id: &str) -> Result<bool, DedupError> {
        let mut seen = self.seen.lock();
        Ok(seen.insert((consumer.to_string(), message_id.to_string())))
    }

    async fn is_processed(&self, consumer: &str, message_id: &str) -> Result<bool, DedupError> {
        let seen = self.seen.lock();
        Ok(seen.contains(&(consumer.to_string(), message_id.to_string())))
    }

    async fn mark_processed(&self, consumer: &str, message_id: &str) -> Result<(), DedupError> {
        let mut seen = self.seen.lock();
        seen.insert((consumer.to_string(), message_id.to_string()));
        Ok(())
    }
}
