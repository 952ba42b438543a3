//! Facts-sync algorithm: the per-scope, single-transaction reconciliation
//! of newly extracted claims/goals/risks/contradictions against the
//! current graph view. Expressed against `&dyn GraphStore` so it runs
//! identically over the in-memory and Postgres backends.

use super::{content_matches, AsOf, GraphStore, NewEdge, NewNode};
use crate::error::GraphError;
use crate::types::{EdgeType, NodeStatus, NodeType};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct IncomingClaim {
    pub content: String,
    pub confidence: f64,
    pub source_ref: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct IncomingFact {
    pub content: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FactsSyncInput {
    pub scope_id: String,
    pub created_by: String,
    pub claims: Vec<IncomingClaim>,
    pub goals: Vec<IncomingFact>,
    pub risks: Vec<IncomingFact>,
    /// Free-text contradiction statements, each parsed against either
    /// `NLI: "a" vs "b"` or `a contradicts b`.
    pub contradictions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FactsSyncResult {
    pub inserted: usize,
    pub confidence_updated: usize,
    pub reactivated: usize,
    pub marked_irrelevant: usize,
    pub contradiction_edges_added: usize,
}

fn contradiction_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)^\s*(?:NLI:\s*"(?P<a1>[^"]+)"\s*vs\s*"(?P<b1>[^"]+)"|(?P<a2>.+?)\s+contradicts\s+(?P<b2>.+))\s*$"#)
            .expect("contradiction regex is a fixed, valid pattern")
    })
}

/// Parses a contradiction statement into its two fragments, trying the
/// `NLI: "a" vs "b"` form first, then `a contradicts b`.
pub fn parse_contradiction(text: &str) -> Option<(String, String)> {
    let caps = contradiction_regex().captures(text)?;
    if let (Some(a), Some(b)) = (caps.name("a1"), caps.name("b1")) {
        return Some((a.as_str().trim().to_string(), b.as_str().trim().to_string()));
    }
    if let (Some(a), Some(b)) = (caps.name("a2"), caps.name("b2")) {
        return Some((a.as_str().trim().to_string(), b.as_str().trim().to_string()));
    }
    None
}

async fn sync_fact_nodes(
    store: &dyn GraphStore,
    scope_id: &str,
    created_by: &str,
    node_type: NodeType,
    incoming: &[IncomingFact],
    result: &mut FactsSyncResult,
) -> Result<(), GraphError> {
    let existing = store.current_nodes(scope_id, Some(node_type), AsOf::default()).await?;
    let mut matched_ids = std::collections::HashSet::new();

    for fact in incoming {
        let found = existing.iter().find(|n| content_matches(&n.content, &fact.content));
        match found {
            Some(node) => {
                matched_ids.insert(node.node_id);
                if fact.confidence >= node.confidence {
                    store.update_confidence(node.node_id, fact.confidence).await?;
                    result.confidence_updated += 1;
                }
                if node.status != NodeStatus::Active {
                    store.set_status(node.node_id, NodeStatus::Active).await?;
                    result.reactivated += 1;
                }
            }
            None => {
                store
                    .insert_node(NewNode {
                        scope_id: scope_id.to_string(),
                        node_type,
                        content: fact.content.clone(),
                        confidence: fact.confidence,
                        status: NodeStatus::Active,
                        source_ref: None,
                        metadata: json!({}),
                        created_by: created_by.to_string(),
                    })
                    .await?;
                result.inserted += 1;
            }
        }
    }

    for node in existing.iter().filter(|n| n.status == NodeStatus::Active) {
        if !matched_ids.contains(&node.node_id) {
            store.set_status(node.node_id, NodeStatus::Irrelevant).await?;
            result.marked_irrelevant += 1;
        }
    }

    Ok(())
}

/// Runs the full facts-sync algorithm for one scope. Callers are
/// responsible for running this inside a single database transaction when
/// `store` is Postgres-backed, so the reconciliation is all-or-nothing.
pub async fn sync_facts(
    store: &dyn GraphStore,
    input: &FactsSyncInput,
) -> Result<FactsSyncResult, GraphError> {
    let mut result = FactsSyncResult::default();

    // Claims: matched by exact-or-prefix content containment.
    let existing_claims = store
        .current_nodes(&input.scope_id, Some(NodeType::Claim), AsOf::default())
        .await?;
    let mut matched_claim_ids = std::collections::HashSet::new();
    for claim in &input.claims {
        let found = existing_claims
            .iter()
            .find(|n| content_matches(&n.content, &claim.content));
        match found {
            Some(node) => {
                matched_claim_ids.insert(node.node_id);
                if claim.confidence >= node.confidence {
                    store.update_confidence(node.node_id, claim.confidence).await?;
                    result.confidence_updated += 1;
                }
                if node.status != NodeStatus::Active {
                    store.set_status(node.node_id, NodeStatus::Active).await?;
                    result.reactivated += 1;
                }
            }
            None => {
                store
                    .insert_node(NewNode {
                        scope_id: input.scope_id.clone(),
                        node_type: NodeType::Claim,
                        content: claim.content.clone(),
                        confidence: claim.confidence,
                        status: NodeStatus::Active,
                        source_ref: claim.source_ref.clone(),
                        metadata: json!({}),
                        created_by: input.created_by.clone(),
                    })
                    .await?;
                result.inserted += 1;
            }
        }
    }
    for node in existing_claims.iter().filter(|n| n.status == NodeStatus::Active) {
        if !matched_claim_ids.contains(&node.node_id) {
            store.set_status(node.node_id, NodeStatus::Irrelevant).await?;
            result.marked_irrelevant += 1;
        }
    }

    sync_fact_nodes(
        store,
        &input.scope_id,
        &input.created_by,
        NodeType::Goal,
        &input.goals,
        &mut result,
    )
    .await?;
    sync_fact_nodes(
        store,
        &input.scope_id,
        &input.created_by,
        NodeType::Risk,
        &input.risks,
        &mut result,
    )
    .await?;

    // Contradictions: resolve each fragment to a node id, then append an
    // edge unless a `resolves` edge already protects either endpoint.
    let all_nodes = store.current_nodes(&input.scope_id, None, AsOf::default()).await?;
    for text in &input.contradictions {
        let Some((a_text, b_text)) = parse_contradiction(text) else {
            continue;
        };
        let a_node = all_nodes.iter().find(|n| content_matches(&n.content, &a_text));
        let b_node = all_nodes.iter().find(|n| content_matches(&n.content, &b_text));
        let (Some(a_node), Some(b_node)) = (a_node, b_node) else {
            continue;
        };

        let a_protected = store.has_resolves_edge_touching(&input.scope_id, a_node.node_id).await?;
        let b_protected = store.has_resolves_edge_touching(&input.scope_id, b_node.node_id).await?;
        if a_protected || b_protected {
            continue;
        }

        store
            .insert_edge(NewEdge {
                scope_id: input.scope_id.clone(),
                source_id: a_node.node_id,
                target_id: b_node.node_id,
                edge_type: EdgeType::Contradicts,
                weight: 1.0,
                metadata: json!({ "source_text": text }),
                created_by: input.created_by.clone(),
            })
            .await?;
        result.contradiction_edges_added += 1;
    }

    Ok(result)
}
