//! Pending-review registry: tracks proposals the governance pipeline has
//! routed to a human, so the watchdog can submit idempotently and an
//! operator-facing surface can list what's waiting.

use crate::error::GovernanceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PendingReview {
    pub scope_id: String,
    pub proposal_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PendingReviewRegistry: Send + Sync {
    async fn insert_pending(
        &self,
        scope_id: &str,
        proposal_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), GovernanceError>;

    async fn is_pending(&self, scope_id: &str) -> Result<bool, GovernanceError>;

    async fn get_pending(&self, scope_id: &str) -> Result<Option<PendingReview>, GovernanceError>;

    async fn resolve(&self, scope_id: &str) -> Result<(), GovernanceError>;
}

pub struct PgPendingReviewRegistry {
    pool: PgPool,
}

impl PgPendingReviewRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingReviewRegistry for PgPendingReviewRegistry {
    async fn insert_pending(
        &self,
        scope_id: &str,
        proposal_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), GovernanceError> {
        sqlx::query(
            "INSERT INTO pending_reviews (scope_id, proposal_id, payload, created_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (scope_id) DO UPDATE SET proposal_id = $2, payload = $3, created_at = now()",
        )
        .bind(scope_id)
        .bind(proposal_id)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(|e| GovernanceError::PendingReview(e.to_string()))?;
        Ok(())
    }

    async fn is_pending(&self, scope_id: &str) -> Result<bool, GovernanceError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM pending_reviews WHERE scope_id = $1")
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GovernanceError::PendingReview(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn get_pending(&self, scope_id: &str) -> Result<Option<PendingReview>, GovernanceError> {
        let row: Option<(Uuid, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT proposal_id, payload, created_at FROM pending_reviews WHERE scope_id = $1",
        )
        .bind(scope_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GovernanceError::PendingReview(e.to_string()))?;
        Ok(row.map(|(proposal_id, payload, created_at)| PendingReview {
            scope_id: scope_id.to_string(),
            proposal_id,
            payload,
            created_at,
        }))
    }

    async fn resolve(&self, scope_id: &str) -> Result<(), GovernanceError> {
        sqlx::query("DELETE FROM pending_reviews WHERE scope_id = $1")
            .bind(scope_id)
            .execute(&self.pool)
            .await
            .map_err(|e| GovernanceError::PendingReview(e.to_string()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPendingReviewRegistry {
    rows: Mutex<HashMap<String, PendingReview>>,
}

impl MemoryPendingReviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingReviewRegistry for MemoryPendingReviewRegistry {
    async fn insert_pending(
        &self,
        scope_id: &str,
        proposal_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), GovernanceError> {
        self.rows.lock().insert(
            scope_id.to_string(),
            PendingReview {
                scope_id: scope_id.to_string(),
                proposal_id,
                payload,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn is_pending(&self, scope_id: &str) -> Result<bool, GovernanceError> {
        Ok(self.rows.lock().contains_key(scope_id))
    }

    async fn get_pending(&self, scope_id: &str) -> Result<Option<PendingReview>, GovernanceError> {
        Ok(self.rows.lock().get(scope_id).cloned())
    }

    async fn resolve(&self, scope_id: &str) -> Result<(), GovernanceError> {
        self.rows.lock().remove(scope_id);
        Ok(())
    }
}
