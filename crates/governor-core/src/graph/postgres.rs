//! Postgres-backed `GraphStore`, over the `nodes` and `edges` tables.

use super::{AsOf, GraphStore, NewEdge, NewNode};
use crate::error::GraphError;
use crate::types::{Edge, EdgeType, Node, NodeId, NodeStatus, NodeType};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_node(row: sqlx::postgres::PgRow) -> Result<Node, GraphError> {
    let node_type_str: String = row.try_get("type")?;
    let status_str: String = row.try_get("status")?;
    Ok(Node {
        node_id: row.try_get("node_id")?,
        scope_id: row.try_get("scope_id")?,
        node_type: parse_node_type(&node_type_str),
        content: row.try_get("content")?,
        confidence: row.try_get("confidence")?,
        status: parse_node_status(&status_str),
        source_ref: row.try_get("source_ref")?,
        metadata: row.try_get("metadata")?,
        created_by: row.try_get("created_by")?,
        version: row.try_get("version")?,
        recorded_at: row.try_get("recorded_at")?,
        superseded_at: row.try_get("superseded_at")?,
        valid_from: row.try_get("valid_from")?,
        valid_to: row.try_get("valid_to")?,
    })
}

fn row_to_edge(row: sqlx::postgres::PgRow) -> Result<Edge, GraphError> {
    let edge_type_str: String = row.try_get("edge_type")?;
    Ok(Edge {
        edge_id: row.try_get("edge_id")?,
        scope_id: row.try_get("scope_id")?,
        source_id: row.try_get("source_id")?,
        target_id: row.try_get("target_id")?,
        edge_type: parse_edge_type(&edge_type_str),
        weight: row.try_get("weight")?,
        metadata: row.try_get("metadata")?,
        created_by: row.try_get("created_by")?,
        recorded_at: row.try_get("recorded_at")?,
        superseded_at: row.try_get("superseded_at")?,
        valid_from: row.try_get("valid_from")?,
        valid_to: row.try_get("valid_to")?,
    })
}

fn node_type_str(t: NodeType) -> &'static str {
    match t {
        NodeType::Claim => "claim",
        NodeType::Goal => "goal",
        NodeType::Risk => "risk",
        NodeType::Assessment => "assessment",
        NodeType::Contradiction => "contradiction",
        NodeType::Custom => "custom",
    }
}

fn parse_node_type(s: &str) -> NodeType {
    match s {
        "claim" => NodeType::Claim,
        "goal" => NodeType::Goal,
        "risk" => NodeType::Risk,
        "assessment" => NodeType::Assessment,
        "contradiction" => NodeType::Contradiction,
        _ => NodeType::Custom,
    }
}

fn node_status_str(s: NodeStatus) -> &'static str {
    match s {
        NodeStatus::Active => "active",
        NodeStatus::Irrelevant => "irrelevant",
        NodeStatus::Resolved => "resolved",
    }
}

fn parse_node_status(s: &str) -> NodeStatus {
    match s {
        "irrelevant" => NodeStatus::Irrelevant,
        "resolved" => NodeStatus::Resolved,
        _ => NodeStatus::Active,
    }
}

fn edge_type_str(t: EdgeType) -> &'static str {
    match t {
        EdgeType::Contradicts => "contradicts",
        EdgeType::Resolves => "resolves",
        EdgeType::Custom => "custom",
    }
}

fn parse_edge_type(s: &str) -> EdgeType {
    match s {
        "contradicts" => EdgeType::Contradicts,
        "resolves" => EdgeType::Resolves,
        _ => EdgeType::Custom,
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn insert_node(&self, n: NewNode) -> Result<Node, GraphError> {
        let row = sqlx::query(
            "INSERT INTO nodes (node_id, scope_id, type, content, confidence, status, \
             source_ref, metadata, created_by, version, recorded_at) \
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, 1, now()) \
             RETURNING *",
        )
        .bind(&n.scope_id)
        .bind(node_type_str(n.node_type))
        .bind(&n.content)
        .bind(n.confidence)
        .bind(node_status_str(n.status))
        .bind(&n.source_ref)
        .bind(&n.metadata)
        .bind(&n.created_by)
        .fetch_one(&self.pool)
        .await?;
        row_to_node(row)
    }

    async fn update_confidence(&self, node_id: NodeId, new_confidence: f64) -> Result<Node, GraphError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let existing = row_to_node(row)?;
        if new_confidence < existing.confidence {
            return Err(GraphError::ConfidenceRegression {
                new: new_confidence,
                existing: existing.confidence,
            });
        }
        let row = sqlx::query(
            "UPDATE nodes SET confidence = $1, version = version + 1 WHERE node_id = $2 RETURNING *",
        )
        .bind(new_confidence)
        .bind(node_id)
        .fetch_one(&self.pool)
        .await?;
        row_to_node(row)
    }

    async fn set_status(&self, node_id: NodeId, status: NodeStatus) -> Result<Node, GraphError> {
        let row = sqlx::query(
            "UPDATE nodes SET status = $1, version = version + 1 WHERE node_id = $2 RETURNING *",
        )
        .bind(node_status_str(status))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(GraphError::NodeNotFound(node_id))?;
        row_to_node(row)
    }

    async fn supersede_node(&self, node_id: NodeId, replacement: NewNode) -> Result<Node, GraphError> {
        let mut txn = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE nodes SET superseded_at = now() WHERE node_id = $1 RETURNING node_id")
            .bind(node_id)
            .fetch_optional(&mut *txn)
            .await?;
        if updated.is_none() {
            return Err(GraphError::NodeNotFound(node_id));
        }

        let row = sqlx::query(
            "INSERT INTO nodes (node_id, scope_id, type, content, confidence, status, \
             source_ref, metadata, created_by, version, recorded_at) \
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, 1, now()) \
             RETURNING *",
        )
        .bind(&replacement.scope_id)
        .bind(node_type_str(replacement.node_type))
        .bind(&replacement.content)
        .bind(replacement.confidence)
        .bind(node_status_str(replacement.status))
        .bind(&replacement.source_ref)
        .bind(&replacement.metadata)
        .bind(&replacement.created_by)
        .fetch_one(&mut *txn)
        .await?;

        let node = row_to_node(row)?;
        txn.commit().await?;
        Ok(node)
    }

    async fn get_node(&self, node_id: NodeId) -> Result<Node, GraphError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GraphError::NodeNotFound(node_id))?;
        row_to_node(row)
    }

    async fn current_nodes(
        &self,
        scope_id: &str,
        node_type: Option<NodeType>,
        as_of: AsOf,
    ) -> Result<Vec<Node>, GraphError> {
        // The recorded-time axis (`recorded_at`/`superseded_at`) and the
        // valid-time axis (`valid_from`/`valid_to`) are independent filters
        // that both must pass; each defaults to `now()` when not given, so
        // the default call (`AsOf::default()`) reduces to the live-current
        // view on both axes.
        let recorded_cutoff = as_of.as_of_recorded_at.unwrap_or_else(chrono::Utc::now);
        let valid_cutoff = as_of.as_of_valid_time.unwrap_or_else(chrono::Utc::now);
        let rows = sqlx::query(
            "SELECT * FROM nodes WHERE scope_id = $1 AND recorded_at <= $2 \
             AND (superseded_at IS NULL OR superseded_at > $2) \
             AND (valid_from IS NULL OR valid_from <= $3) \
             AND (valid_to IS NULL OR valid_to > $3) \
             AND ($4::text IS NULL OR type = $4) ORDER BY recorded_at ASC",
        )
        .bind(scope_id)
        .bind(recorded_cutoff)
        .bind(valid_cutoff)
        .bind(node_type.map(node_type_str))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_node).collect()
    }

    async fn insert_edge(&self, e: NewEdge) -> Result<Edge, GraphError> {
        let row = sqlx::query(
            "INSERT INTO edges (edge_id, scope_id, source_id, target_id, edge_type, weight, \
             metadata, created_by, recorded_at) \
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, now()) RETURNING *",
        )
        .bind(&e.scope_id)
        .bind(e.source_id)
        .bind(e.target_id)
        .bind(edge_type_str(e.edge_type))
        .bind(e.weight)
        .bind(&e.metadata)
        .bind(&e.created_by)
        .fetch_one(&self.pool)
        .await?;
        row_to_edge(row)
    }

    async fn current_edges(
        &self,
        scope_id: &str,
        edge_type: Option<EdgeType>,
        as_of: AsOf,
    ) -> Result<Vec<Edge>, GraphError> {
        let recorded_cutoff = as_of.as_of_recorded_at.unwrap_or_else(chrono::Utc::now);
        let valid_cutoff = as_of.as_of_valid_time.unwrap_or_else(chrono::Utc::now);
        let rows = sqlx::query(
            "SELECT * FROM edges WHERE scope_id = $1 AND recorded_at <= $2 \
             AND (superseded_at IS NULL OR superseded_at > $2) \
             AND (valid_from IS NULL OR valid_from <= $3) \
             AND (valid_to IS NULL OR valid_to > $3) \
             AND ($4::text IS NULL OR edge_type = $4) ORDER BY recorded_at ASC",
        )
        .bind(scope_id)
        .bind(recorded_cutoff)
        .bind(valid_cutoff)
        .bind(edge_type.map(edge_type_str))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_edge).collect()
    }

    async fn has_resolves_edge_touching(&self, scope_id: &str, node_id: NodeId) -> Result<bool, GraphError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM edges WHERE scope_id = $1 AND superseded_at IS NULL \
             AND edge_type = 'resolves' AND (source_id = $2 OR target_id = $2))",
        )
        .bind(scope_id)
        .bind(node_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
