//! In-memory `GraphStore` used by unit tests and the facts-sync property
//! tests, where the append-over-update discipline matters far more than
//! persistence.

use super::{AsOf, GraphStore, NewEdge, NewNode};
use crate::error::GraphError;
use crate::types::{Edge, EdgeType, Node, NodeId, NodeStatus, NodeType};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: parking_lot::Mutex<Vec<Node>>,
    edges: parking_lot::Mutex<Vec<Edge>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Bitemporal visibility shared by nodes and edges: the recorded-time axis
/// (`recorded_at`/`superseded_at`) and the valid-time axis
/// (`valid_from`/`valid_to`) are independent filters that both must pass —
/// when `as_of_valid_time` is given it composes with `as_of_recorded_at`
/// rather than replacing it.
fn bitemporal_visible(
    recorded_at: chrono::DateTime<Utc>,
    superseded_at: Option<chrono::DateTime<Utc>>,
    valid_from: Option<chrono::DateTime<Utc>>,
    valid_to: Option<chrono::DateTime<Utc>>,
    as_of: AsOf,
    now: chrono::DateTime<Utc>,
) -> bool {
    let recorded_cutoff = as_of.as_of_recorded_at.unwrap_or(now);
    if recorded_at > recorded_cutoff {
        return false;
    }
    if let Some(superseded_at) = superseded_at {
        if superseded_at <= recorded_cutoff {
            return false;
        }
    }
    let valid_cutoff = as_of.as_of_valid_time.unwrap_or(now);
    let from_ok = valid_from.map(|f| f <= valid_cutoff).unwrap_or(true);
    let to_ok = valid_to.map(|t| t > valid_cutoff).unwrap_or(true);
    from_ok && to_ok
}

fn is_visible(node: &Node, as_of: AsOf, now: chrono::DateTime<Utc>) -> bool {
    bitemporal_visible(
        node.recorded_at,
        node.superseded_at,
        node.valid_from,
        node.valid_to,
        as_of,
        now,
    )
}

fn is_edge_visible(edge: &Edge, as_of: AsOf, now: chrono::DateTime<Utc>) -> bool {
    bitemporal_visible(
        edge.recorded_at,
        edge.superseded_at,
        edge.valid_from,
        edge.valid_to,
        as_of,
        now,
    )
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn insert_node(&self, new_node: NewNode) -> Result<Node, GraphError> {
        let now = Utc::now();
        let node = Node {
            node_id: Uuid::new_v4(),
            scope_id: new_node.scope_id,
            node_type: new_node.node_type,
            content: new_node.content,
            confidence: new_node.confidence,
            status: new_node.status,
            source_ref: new_node.source_ref,
            metadata: new_node.metadata,
            created_by: new_node.created_by,
            version: 1,
            recorded_at: now,
            superseded_at: None,
            valid_from: None,
            valid_to: None,
        };
        self.nodes.lock().push(node.clone());
        Ok(node)
    }

    async fn update_confidence(&self, node_id: NodeId, new_confidence: f64) -> Result<Node, GraphError> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .iter_mut()
            .find(|n| n.node_id == node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        if new_confidence < node.confidence {
            return Err(GraphError::ConfidenceRegression {
                new: new_confidence,
                existing: node.confidence,
            });
        }
        node.confidence = new_confidence;
        node.version += 1;
        Ok(node.clone())
    }

    async fn set_status(&self, node_id: NodeId, status: NodeStatus) -> Result<Node, GraphError> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .iter_mut()
            .find(|n| n.node_id == node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        node.status = status;
        node.version += 1;
        Ok(node.clone())
    }

    async fn supersede_node(&self, node_id: NodeId, replacement: NewNode) -> Result<Node, GraphError> {
        let now = Utc::now();
        let mut nodes = self.nodes.lock();
        {
            let old = nodes
                .iter_mut()
                .find(|n| n.node_id == node_id)
                .ok_or(GraphError::NodeNotFound(node_id))?;
            old.superseded_at = Some(now);
        }
        let new_node = Node {
            node_id: Uuid::new_v4(),
            scope_id: replacement.scope_id,
            node_type: replacement.node_type,
            content: replacement.content,
            confidence: replacement.confidence,
            status: replacement.status,
            source_ref: replacement.source_ref,
            metadata: replacement.metadata,
            created_by: replacement.created_by,
            version: 1,
            recorded_at: now,
            superseded_at: None,
            valid_from: None,
            valid_to: None,
        };
        nodes.push(new_node.clone());
        Ok(new_node)
    }

    async fn get_node(&self, node_id: NodeId) -> Result<Node, GraphError> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.node_id == node_id)
            .cloned()
            .ok_or(GraphError::NodeNotFound(node_id))
    }

    async fn current_nodes(
        &self,
        scope_id: &str,
        node_type: Option<NodeType>,
        as_of: AsOf,
    ) -> Result<Vec<Node>, GraphError> {
        let now = Utc::now();
        Ok(self
            .nodes
            .lock()
            .iter()
            .filter(|n| n.scope_id == scope_id)
            .filter(|n| node_type.map(|t| t == n.node_type).unwrap_or(true))
            .filter(|n| is_visible(n, as_of, now))
            .cloned()
            .collect())
    }

    async fn insert_edge(&self, new_edge: NewEdge) -> Result<Edge, GraphError> {
        let now = Utc::now();
        let edge = Edge {
            edge_id: Uuid::new_v4(),
            scope_id: new_edge.scope_id,
            source_id: new_edge.source_id,
            target_id: new_edge.target_id,
            edge_type: new_edge.edge_type,
            weight: new_edge.weight,
            metadata: new_edge.metadata,
            created_by: new_edge.created_by,
            recorded_at: now,
            superseded_at: None,
            valid_from: None,
            valid_to: None,
        };
        self.edges.lock().push(edge.clone());
        Ok(edge)
    }

    async fn current_edges(
        &self,
        scope_id: &str,
        edge_type: Option<EdgeType>,
        as_of: AsOf,
    ) -> Result<Vec<Edge>, GraphError> {
        let now = Utc::now();
        Ok(self
            .edges
            .lock()
            .iter()
            .filter(|e| e.scope_id == scope_id)
            .filter(|e| edge_type.map(|t| t == e.edge_type).unwrap_or(true))
            .filter(|e| is_edge_visible(e, as_of, now))
            .cloned()
            .collect())
    }

    async fn has_resolves_edge_touching(&self, scope_id: &str, node_id: NodeId) -> Result<bool, GraphError> {
        Ok(self.edges.lock().iter().any(|e| {
            e.scope_id == scope_id
                && e.superseded_at.is_none()
                && e.edge_type == EdgeType::Resolves
                && (e.source_id == node_id || e.target_id == node_id)
        }))
    }
}
