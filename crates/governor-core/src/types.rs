//! Core domain types shared across every component: scopes, nodes, edges,
//! the per-scope state machine row, WAL envelopes, and proposals.
//!
//! Nothing here is ambient plumbing — it's the vocabulary every other
//! module in this crate speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Partition key for everything in the system. Every node, edge, state row,
/// and proposal carries one.
pub type ScopeId = String;

pub type NodeId = Uuid;
pub type EdgeId = Uuid;
pub type ProposalId = Uuid;

/// Monotonically increasing WAL sequence number.
pub type Seq = i64;

/// The type axis of a knowledge-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Claim,
    Goal,
    Risk,
    Assessment,
    Contradiction,
    Custom,
}

/// Labelling axis for a node. Freely mutable, unlike `confidence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Irrelevant,
    Resolved,
}

/// A node in the knowledge graph. `recorded_at`/`superseded_at`/`valid_from`/
/// `valid_to` form the bitemporal envelope; the "current" view is
/// `superseded_at.is_none() && (valid_to.is_none() || valid_to > now)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub scope_id: ScopeId,
    pub node_type: NodeType,
    pub content: String,
    pub confidence: f64,
    pub status: NodeStatus,
    pub source_ref: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub version: i32,
    pub recorded_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Node {
    /// Whether this row is part of the "current" bitemporal view as of `now`.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.superseded_at.is_none() && self.valid_to.map(|vt| vt > now).unwrap_or(true)
    }
}

/// Edge type axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Contradicts,
    Resolves,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: EdgeId,
    pub scope_id: ScopeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub recorded_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// The three stops of the per-scope state machine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNode {
    ContextIngested,
    FactsExtracted,
    DriftChecked,
}

impl WorkflowNode {
    /// The node that follows this one in the fixed cycle
    /// `ContextIngested -> FactsExtracted -> DriftChecked -> ContextIngested`.
    pub fn next(self) -> Self {
        match self {
            WorkflowNode::ContextIngested => WorkflowNode::FactsExtracted,
            WorkflowNode::FactsExtracted => WorkflowNode::DriftChecked,
            WorkflowNode::DriftChecked => WorkflowNode::ContextIngested,
        }
    }
}

/// Per-scope state machine row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeState {
    pub scope_id: ScopeId,
    pub run_id: Uuid,
    pub last_node: WorkflowNode,
    pub epoch: i64,
    pub updated_at: DateTime<Utc>,
}

/// Envelope carried by every WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: DateTime<Utc>,
    pub source: String,
    pub correlation_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

/// A row appended to the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEvent {
    pub seq: Seq,
    pub ts: DateTime<Utc>,
    pub data: EventEnvelope,
}

/// Admission mode under which a proposal is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Fully autonomous; deterministic policy plus optional LLM oversight.
    Yolo,
    /// Human-in-the-loop; every non-blocked transition still pends for review.
    Mitl,
    /// Operator override; bypasses policy entirely.
    Master,
}

/// A request to advance the state machine, proposed by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: ProposalId,
    pub agent: String,
    pub proposed_action: String,
    pub target_node: String,
    pub payload: ProposalPayload,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub expected_epoch: i64,
    pub from: WorkflowNode,
    pub to: WorkflowNode,
}

/// Drift severity as produced by the (out-of-scope) drift-analysis worker and
/// consumed by the policy engine and governance pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub level: DriftLevel,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for DriftLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftLevel::None => "none",
            DriftLevel::Low => "low",
            DriftLevel::Medium => "medium",
            DriftLevel::High => "high",
            DriftLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Generic key/value bag used by a handful of config and metadata structs,
/// kept distinct from `serde_json::Value` so callers get typed string access.
pub type MetadataMap = HashMap<String, String>;
