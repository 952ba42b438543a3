//! Per-scope CAS state machine. `advance` is the only mutator; it either
//! succeeds exactly once for a racing pair of callers sharing the same
//! `expected_epoch`, or returns `None` for the loser.

use crate::error::StateMachineError;
use crate::policy::{can_transition, PolicyConfig};
use crate::types::{DriftSnapshot, EventEnvelope, ScopeState, WorkflowNode};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

/// Optional governance inputs to `advance`: when both are present the
/// transition is policy-checked before being applied.
#[derive(Debug, Clone, Default)]
pub struct AdvanceGuard<'a> {
    pub drift: Option<&'a DriftSnapshot>,
    pub policy: Option<&'a PolicyConfig>,
}

#[async_trait]
pub trait StateMachine: Send + Sync {
    async fn get_state(&self, scope_id: &str) -> Result<Option<ScopeState>, StateMachineError>;

    async fn bootstrap(&self, scope_id: &str, run_id: Uuid) -> Result<ScopeState, StateMachineError>;

    /// Advances `scope_id` from `expected_epoch` to `expected_epoch + 1`,
    /// atomically appending a `state_transition` WAL event in the same
    /// transaction. Returns `Ok(None)` when the epoch no longer matches
    /// (the CAS lost) or when the guard blocks the transition.
    async fn advance(
        &self,
        scope_id: &str,
        expected_epoch: i64,
        guard: AdvanceGuard<'_>,
    ) -> Result<Option<ScopeState>, StateMachineError>;
}

pub struct PgStateMachine {
    pool: PgPool,
}

impl PgStateMachine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn workflow_node_str(n: WorkflowNode) -> &'static str {
    match n {
        WorkflowNode::ContextIngested => "ContextIngested",
        WorkflowNode::FactsExtracted => "FactsExtracted",
        WorkflowNode::DriftChecked => "DriftChecked",
    }
}

fn parse_workflow_node(s: &str) -> WorkflowNode {
    match s {
        "FactsExtracted" => WorkflowNode::FactsExtracted,
        "DriftChecked" => WorkflowNode::DriftChecked,
        _ => WorkflowNode::ContextIngested,
    }
}

#[async_trait]
impl StateMachine for PgStateMachine {
    async fn get_state(&self, scope_id: &str) -> Result<Option<ScopeState>, StateMachineError> {
        let row: Option<(Uuid, String, i64, chrono::DateTime<Utc>)> = sqlx::query_as(
            "SELECT run_id, last_node, epoch, updated_at FROM swarm_state WHERE scope_id = $1",
        )
        .bind(scope_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(run_id, last_node, epoch, updated_at)| ScopeState {
            scope_id: scope_id.to_string(),
            run_id,
            last_node: parse_workflow_node(&last_node),
            epoch,
            updated_at,
        }))
    }

    async fn bootstrap(&self, scope_id: &str, run_id: Uuid) -> Result<ScopeState, StateMachineError> {
        let mut txn = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO swarm_state (scope_id, run_id, last_node, epoch, updated_at) \
             VALUES ($1, $2, $3, 0, now()) ON CONFLICT (scope_id) DO NOTHING",
        )
        .bind(scope_id)
        .bind(run_id)
        .bind(workflow_node_str(WorkflowNode::ContextIngested))
        .execute(&mut *txn)
        .await?;

        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            event_type: "bootstrap".to_string(),
            ts: Utc::now(),
            source: "state_machine".to_string(),
            correlation_id: None,
            payload: serde_json::json!({ "scope_id": scope_id, "run_id": run_id }),
        };
        crate::wal::PgWal::append_in_txn(&mut txn, &envelope).await?;
        txn.commit().await?;

        self.get_state(scope_id)
            .await?
            .ok_or_else(|| StateMachineError::ScopeNotFound(scope_id.to_string()))
    }

    async fn advance(
        &self,
        scope_id: &str,
        expected_epoch: i64,
        guard: AdvanceGuard<'_>,
    ) -> Result<Option<ScopeState>, StateMachineError> {
        let mut txn = self.pool.begin().await?;

        let row: Option<(Uuid, String, i64)> = sqlx::query_as(
            "SELECT run_id, last_node, epoch FROM swarm_state WHERE scope_id = $1 FOR UPDATE",
        )
        .bind(scope_id)
        .fetch_optional(&mut *txn)
        .await?;
        let Some((run_id, last_node_str, current_epoch)) = row else {
            return Err(StateMachineError::ScopeNotFound(scope_id.to_string()));
        };
        if current_epoch != expected_epoch {
            return Ok(None);
        }

        let last_node = parse_workflow_node(&last_node_str);
        let next_node = last_node.next();

        if let (Some(drift), Some(policy)) = (guard.drift, guard.policy) {
            let decision = can_transition(last_node, next_node, drift, policy);
            if !decision.allowed {
                return Ok(None);
            }
        }

        let new_epoch = expected_epoch + 1;
        sqlx::query(
            "UPDATE swarm_state SET last_node = $1, epoch = $2, updated_at = now() WHERE scope_id = $3",
        )
        .bind(workflow_node_str(next_node))
        .bind(new_epoch)
        .bind(scope_id)
        .execute(&mut *txn)
        .await?;

        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            event_type: "state_transition".to_string(),
            ts: Utc::now(),
            source: "state_machine".to_string(),
            correlation_id: None,
            payload: serde_json::json!({
                "scope_id": scope_id,
                "run_id": run_id,
                "from": last_node,
                "to": next_node,
                "epoch": new_epoch,
            }),
        };
        crate::wal::PgWal::append_in_txn(&mut txn, &envelope).await?;
        txn.commit().await?;

        Ok(Some(ScopeState {
            scope_id: scope_id.to_string(),
            run_id,
            last_node: next_node,
            epoch: new_epoch,
            updated_at: Utc::now(),
        }))
    }
}

/// In-memory `StateMachine` for unit and e2e tests. Appends its
/// `state_transition`/`bootstrap` events to a shared [`crate::wal::WriteAheadLog`]
/// so callers can assert atomic audit behavior without standing up Postgres.
/// The per-scope lock is an async `tokio::sync::Mutex` rather than a sync
/// one specifically so it can be held across the WAL append's `.await`:
/// that's what makes the epoch bump and the `state_transition` WAL row
/// atomic from a reader's point of view, since `get_state` takes the same
/// lock and so can never observe one without the other.
pub struct MemoryStateMachine {
    wal: std::sync::Arc<dyn crate::wal::WriteAheadLog>,
    rows: dashmap::DashMap<String, tokio::sync::Mutex<ScopeState>>,
}

impl MemoryStateMachine {
    pub fn new(wal: std::sync::Arc<dyn crate::wal::WriteAheadLog>) -> Self {
        Self {
            wal,
            rows: dashmap::DashMap::new(),
        }
    }
}

#[async_trait]
impl StateMachine for MemoryStateMachine {
    async fn get_state(&self, scope_id: &str) -> Result<Option<ScopeState>, StateMachineError> {
        match self.rows.get(scope_id) {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn bootstrap(&self, scope_id: &str, run_id: Uuid) -> Result<ScopeState, StateMachineError> {
        let state = ScopeState {
            scope_id: scope_id.to_string(),
            run_id,
            last_node: WorkflowNode::ContextIngested,
            epoch: 0,
            updated_at: Utc::now(),
        };
        let existing = {
            let inserted = self
                .rows
                .entry(scope_id.to_string())
                .or_insert_with(|| tokio::sync::Mutex::new(state.clone()));
            inserted.lock().await.clone()
        };

        if existing.run_id == run_id && existing.epoch == 0 {
            let envelope = EventEnvelope {
                id: Uuid::new_v4(),
                event_type: "bootstrap".to_string(),
                ts: Utc::now(),
                source: "state_machine".to_string(),
                correlation_id: None,
                payload: serde_json::json!({ "scope_id": scope_id, "run_id": run_id }),
            };
            self.wal.append(envelope).await?;
        }
        Ok(existing)
    }

    async fn advance(
        &self,
        scope_id: &str,
        expected_epoch: i64,
        guard: AdvanceGuard<'_>,
    ) -> Result<Option<ScopeState>, StateMachineError> {
        let Some(row) = self.rows.get(scope_id) else {
            return Err(StateMachineError::ScopeNotFound(scope_id.to_string()));
        };

        // Held from the epoch check through the WAL append and into the
        // mutation itself, so a concurrent `get_state` can never observe
        // the bumped epoch before the matching `state_transition` WAL row
        // exists — and so a second racing `advance` can't pass the same
        // epoch check while this one is still in flight.
        let mut locked = row.lock().await;
        if locked.epoch != expected_epoch {
            return Ok(None);
        }

        let next_node = locked.last_node.next();
        if let (Some(drift), Some(policy)) = (guard.drift, guard.policy) {
            let decision = can_transition(locked.last_node, next_node, drift, policy);
            if !decision.allowed {
                return Ok(None);
            }
        }

        let new_epoch = expected_epoch + 1;
        let from = locked.last_node;
        let run_id = locked.run_id;

        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            event_type: "state_transition".to_string(),
            ts: Utc::now(),
            source: "state_machine".to_string(),
            correlation_id: None,
            payload: serde_json::json!({
                "scope_id": scope_id,
                "run_id": run_id,
                "from": from,
                "to": next_node,
                "epoch": new_epoch,
            }),
        };
        self.wal.append(envelope).await?;

        locked.last_node = next_node;
        locked.epoch = new_epoch;
        locked.updated_at = Utc::now();

        Ok(Some(locked.clone()))
    }
}
