//! Knowledge graph store: bitemporal nodes/edges, scope partitioning, and
//! append-over-update semantics. The monotonic upsert discipline lives on
//! [`GraphStore`] implementations; the facts-sync algorithm itself is
//! backend-agnostic and lives in [`facts_sync`].

pub mod facts_sync;
pub mod memory;
pub mod postgres;

use crate::error::GraphError;
use crate::types::{Edge, EdgeType, Node, NodeId, NodeStatus, NodeType, ScopeId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Fields needed to append a brand-new node row.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub scope_id: ScopeId,
    pub node_type: NodeType,
    pub content: String,
    pub confidence: f64,
    pub status: NodeStatus,
    pub source_ref: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct NewEdge {
    pub scope_id: ScopeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub metadata: serde_json::Value,
    pub created_by: String,
}

/// Optional time-travel parameters for reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsOf {
    pub as_of_valid_time: Option<DateTime<Utc>>,
    pub as_of_recorded_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn insert_node(&self, node: NewNode) -> Result<Node, GraphError>;

    /// Monotonic confidence ratchet: rejects the update when `new <
    /// existing.confidence`.
    async fn update_confidence(&self, node_id: NodeId, new_confidence: f64) -> Result<Node, GraphError>;

    async fn set_status(&self, node_id: NodeId, status: NodeStatus) -> Result<Node, GraphError>;

    /// Marks `node_id`'s current row superseded and inserts `replacement`
    /// as the new current row for the same logical entity.
    async fn supersede_node(&self, node_id: NodeId, replacement: NewNode) -> Result<Node, GraphError>;

    async fn get_node(&self, node_id: NodeId) -> Result<Node, GraphError>;

    async fn current_nodes(
        &self,
        scope_id: &str,
        node_type: Option<NodeType>,
        as_of: AsOf,
    ) -> Result<Vec<Node>, GraphError>;

    async fn insert_edge(&self, edge: NewEdge) -> Result<Edge, GraphError>;

    async fn current_edges(
        &self,
        scope_id: &str,
        edge_type: Option<EdgeType>,
        as_of: AsOf,
    ) -> Result<Vec<Edge>, GraphError>;

    /// Whether any `resolves` edge currently targets `node_id` — once a
    /// contradiction is resolved it must never be recreated.
    async fn has_resolves_edge_touching(&self, scope_id: &str, node_id: NodeId) -> Result<bool, GraphError>;
}

/// Content match used throughout facts-sync: exact equality, or either
/// string being a prefix of the other.
pub fn content_matches(existing: &str, incoming: &str) -> bool {
    existing == incoming || existing.starts_with(incoming) || incoming.starts_with(existing)
}
