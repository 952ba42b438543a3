//! Append-only event log. Backs `context_events` — a `BIGSERIAL`
//! ascending-sequence table that is the single source of audit truth for
//! the whole system.

use crate::error::WalError;
use crate::types::{EventEnvelope, Seq, WalEvent};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

/// Event types consulted by the "pipeline latest seq" specializations —
/// the broad set used when looking for the most recent governance
/// activity of any kind.
pub const PIPELINE_EVENT_TYPES: &[&str] = &[
    "bootstrap",
    "state_transition",
    "facts_extracted",
    "drift_analyzed",
    "actions_planned",
    "status_summarized",
];

/// The narrower set that gates fact-extraction activation: only new input
/// (not governance's own decisions) should re-arm the facts-extraction
/// stage.
pub const FACTS_ACTIVATION_EVENT_TYPES: &[&str] = &["bootstrap", "context_doc", "resolution"];

#[async_trait]
pub trait WriteAheadLog: Send + Sync {
    async fn append(&self, data: EventEnvelope) -> Result<Seq, WalError>;
    async fn tail(&self, limit: i64) -> Result<Vec<WalEvent>, WalError>;
    async fn since(&self, after_seq: Seq, limit: i64) -> Result<Vec<WalEvent>, WalError>;

    /// Highest `seq` among rows whose `data.type` is in `event_types`, or
    /// `None` if no such row exists yet.
    async fn latest_seq_for_types(&self, event_types: &[&str]) -> Result<Option<Seq>, WalError>;
}

pub struct PgWal {
    pool: PgPool,
}

impl PgWal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends `data` using an existing transaction, so callers that must
    /// write the WAL row atomically with another mutation (state advance,
    /// pending-review insert) can compose it in. Returns the new `seq`.
    pub async fn append_in_txn(
        txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        data: &EventEnvelope,
    ) -> Result<Seq, WalError> {
        let payload = serde_json::to_value(data)?;
        let row = sqlx::query("INSERT INTO context_events (ts, data) VALUES ($1, $2) RETURNING seq")
            .bind(Utc::now())
            .bind(payload)
            .fetch_one(&mut **txn)
            .await?;
        Ok(row.try_get::<i64, _>("seq")?)
    }
}

#[async_trait]
impl WriteAheadLog for PgWal {
    async fn append(&self, data: EventEnvelope) -> Result<Seq, WalError> {
        let payload = serde_json::to_value(&data)?;
        let row = sqlx::query("INSERT INTO context_events (ts, data) VALUES ($1, $2) RETURNING seq")
            .bind(Utc::now())
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("seq")?)
    }

    async fn tail(&self, limit: i64) -> Result<Vec<WalEvent>, WalError> {
        let rows = sqlx::query(
            "SELECT seq, ts, data FROM (SELECT seq, ts, data FROM context_events ORDER BY seq DESC LIMIT $1) sub ORDER BY seq ASC",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn since(&self, after_seq: Seq, limit: i64) -> Result<Vec<WalEvent>, WalError> {
        let rows = sqlx::query(
            "SELECT seq, ts, data FROM context_events WHERE seq > $1 ORDER BY seq ASC LIMIT $2",
        )
        .bind(after_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn latest_seq_for_types(&self, event_types: &[&str]) -> Result<Option<Seq>, WalError> {
        let types: Vec<String> = event_types.iter().map(|s| s.to_string()).collect();
        let row = sqlx::query(
            "SELECT MAX(seq) AS seq FROM context_events WHERE data->>'type' = ANY($1)",
        )
        .bind(&types)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<i64>, _>("seq")?)
    }
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<WalEvent, WalError> {
    let seq: i64 = row.try_get("seq")?;
    let ts = row.try_get("ts")?;
    let data_json: serde_json::Value = row.try_get("data")?;
    let data: EventEnvelope = serde_json::from_value(data_json)?;
    Ok(WalEvent { seq, ts, data })
}

/// In-memory `WriteAheadLog` for unit tests that do not stand up Postgres.
pub struct MemoryWal {
    rows: parking_lot::Mutex<Vec<WalEvent>>,
    next_seq: std::sync::atomic::AtomicI64,
}

impl Default for MemoryWal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWal {
    pub fn new() -> Self {
        Self {
            rows: parking_lot::Mutex::new(Vec::new()),
            next_seq: std::sync::atomic::AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl WriteAheadLog for MemoryWal {
    async fn append(&self, data: EventEnvelope) -> Result<Seq, WalError> {
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.rows.lock().push(WalEvent {
            seq,
            ts: Utc::now(),
            data,
        });
        Ok(seq)
    }

    async fn tail(&self, limit: i64) -> Result<Vec<WalEvent>, WalError> {
        let rows = self.rows.lock();
        let start = rows.len().saturating_sub(limit.max(0) as usize);
        Ok(rows[start..].to_vec())
    }

    async fn since(&self, after_seq: Seq, limit: i64) -> Result<Vec<WalEvent>, WalError> {
        let rows = self.rows.lock();
        Ok(rows
            .iter()
            .filter(|e| e.seq > after_seq)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn latest_seq_for_types(&self, event_types: &[&str]) -> Result<Option<Seq>, WalError> {
        let rows = self.rows.lock();
        Ok(rows
            .iter()
            .filter(|e| event_types.contains(&e.data.event_type.as_str()))
            .map(|e| e.seq)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            ts: Utc::now(),
            source: "test".to_string(),
            correlation_id: None,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn seq_is_strictly_increasing() {
        let wal = MemoryWal::new();
        let a = wal.append(envelope("bootstrap")).await.unwrap();
        let b = wal.append(envelope("state_transition")).await.unwrap();
        let c = wal.append(envelope("state_transition")).await.unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn tail_returns_ascending_order() {
        let wal = MemoryWal::new();
        for t in ["bootstrap", "state_transition", "facts_extracted"] {
            wal.append(envelope(t)).await.unwrap();
        }
        let tail = wal.tail(2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail[0].seq < tail[1].seq);
        assert_eq!(tail[1].data.event_type, "facts_extracted");
    }

    #[tokio::test]
    async fn since_excludes_the_boundary_seq() {
        let wal = MemoryWal::new();
        let first = wal.append(envelope("bootstrap")).await.unwrap();
        wal.append(envelope("state_transition")).await.unwrap();
        let rest = wal.since(first, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].data.event_type, "state_transition");
    }

    #[tokio::test]
    async fn latest_seq_for_types_filters_by_event_type() {
        let wal = MemoryWal::new();
        wal.append(envelope("context_doc")).await.unwrap();
        let target = wal.append(envelope("bootstrap")).await.unwrap();
        wal.append(envelope("facts_extracted")).await.unwrap();

        let latest = wal
            .latest_seq_for_types(FACTS_ACTIVATION_EVENT_TYPES)
            .await
            .unwrap();
        assert_eq!(latest, Some(target));
    }
}
