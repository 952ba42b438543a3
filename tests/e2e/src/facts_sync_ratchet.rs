//! Exercises the facts-sync algorithm's ratchet discipline end-to-end:
//! confidence never regresses, a resolved contradiction never comes back,
//! and a stale sync round correctly demotes facts that dropped out of the
//! latest extraction.

use governor_core::error::GraphError;
use governor_core::graph::facts_sync::{FactsSyncInput, IncomingClaim, IncomingFact};
use governor_core::graph::memory::MemoryGraphStore;
use governor_core::graph::{facts_sync::sync_facts, AsOf, GraphStore, NewEdge, NewNode};
use governor_core::types::{EdgeType, NodeStatus, NodeType};
use serde_json::json;

fn claims(pairs: &[(&str, f64)]) -> Vec<IncomingClaim> {
    pairs
        .iter()
        .map(|(content, confidence)| IncomingClaim {
            content: content.to_string(),
            confidence: *confidence,
            source_ref: None,
        })
        .collect()
}

/// A later sync round offering a lower confidence than what's already
/// recorded must never lower it — `sync_facts` only calls
/// `update_confidence` when the incoming value is `>=` the existing one, so
/// the regression never reaches the store's own ratchet check.
#[tokio::test]
async fn lower_confidence_in_a_later_round_never_regresses_the_stored_value() {
    let store = MemoryGraphStore::new();
    let first = FactsSyncInput {
        scope_id: "scope-a".to_string(),
        created_by: "facts-worker".to_string(),
        claims: claims(&[("the deploy window is frozen", 0.8)]),
        ..Default::default()
    };
    sync_facts(&store, &first).await.unwrap();

    let second = FactsSyncInput {
        scope_id: "scope-a".to_string(),
        created_by: "facts-worker".to_string(),
        claims: claims(&[("the deploy window is frozen", 0.4)]),
        ..Default::default()
    };
    let result = sync_facts(&store, &second).await.unwrap();
    assert_eq!(result.confidence_updated, 0, "a lower incoming confidence must not be applied");

    let nodes = store
        .current_nodes("scope-a", Some(NodeType::Claim), AsOf::default())
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].confidence, 0.8, "confidence must remain at its high-water mark");
}

/// The store's own ratchet still rejects a direct regression even bypassing
/// facts-sync's own `>=` guard, confirming the invariant is enforced at two
/// layers.
#[tokio::test]
async fn graph_store_rejects_a_direct_confidence_regression() {
    let store = MemoryGraphStore::new();
    let node = store
        .insert_node(NewNode {
            scope_id: "scope-a".to_string(),
            node_type: NodeType::Claim,
            content: "x".to_string(),
            confidence: 0.6,
            status: NodeStatus::Active,
            source_ref: None,
            metadata: json!({}),
            created_by: "test".to_string(),
        })
        .await
        .unwrap();

    let err = store.update_confidence(node.node_id, 0.2).await.unwrap_err();
    assert!(matches!(err, GraphError::ConfidenceRegression { new, existing } if new == 0.2 && existing == 0.6));
}

/// Once a contradiction is resolved (a `resolves` edge touches either
/// endpoint), re-submitting the same contradiction text never recreates a
/// `contradicts` edge.
#[tokio::test]
async fn resolved_contradiction_cannot_be_reintroduced() {
    let store = MemoryGraphStore::new();
    let a = store
        .insert_node(NewNode {
            scope_id: "scope-b".to_string(),
            node_type: NodeType::Claim,
            content: "the API is stable".to_string(),
            confidence: 0.7,
            status: NodeStatus::Active,
            source_ref: None,
            metadata: json!({}),
            created_by: "test".to_string(),
        })
        .await
        .unwrap();
    let b = store
        .insert_node(NewNode {
            scope_id: "scope-b".to_string(),
            node_type: NodeType::Claim,
            content: "the API changed last week".to_string(),
            confidence: 0.7,
            status: NodeStatus::Active,
            source_ref: None,
            metadata: json!({}),
            created_by: "test".to_string(),
        })
        .await
        .unwrap();

    let input = FactsSyncInput {
        scope_id: "scope-b".to_string(),
        created_by: "facts-worker".to_string(),
        contradictions: vec![r#"NLI: "the API is stable" vs "the API changed last week""#.to_string()],
        ..Default::default()
    };
    let first = sync_facts(&store, &input).await.unwrap();
    assert_eq!(first.contradiction_edges_added, 1);

    store
        .insert_edge(NewEdge {
            scope_id: "scope-b".to_string(),
            source_id: a.node_id,
            target_id: b.node_id,
            edge_type: EdgeType::Resolves,
            weight: 1.0,
            metadata: json!({}),
            created_by: "human".to_string(),
        })
        .await
        .unwrap();

    let second = sync_facts(&store, &input).await.unwrap();
    assert_eq!(second.contradiction_edges_added, 0, "a resolved pair must stay resolved");
}

/// A stale facts sync — a goal missing from a later extraction round is
/// marked irrelevant, then reactivated (without losing its
/// confidence high-water mark) once it reappears.
#[tokio::test]
async fn stale_goal_is_marked_irrelevant_then_reactivates_at_its_prior_confidence() {
    let store = MemoryGraphStore::new();
    let round_one = FactsSyncInput {
        scope_id: "scope-c".to_string(),
        created_by: "facts-worker".to_string(),
        goals: vec![IncomingFact {
            content: "ship v2 by end of quarter".to_string(),
            confidence: 0.65,
        }],
        ..Default::default()
    };
    sync_facts(&store, &round_one).await.unwrap();

    let round_two = FactsSyncInput {
        scope_id: "scope-c".to_string(),
        created_by: "facts-worker".to_string(),
        goals: vec![],
        ..Default::default()
    };
    let result_two = sync_facts(&store, &round_two).await.unwrap();
    assert_eq!(result_two.marked_irrelevant, 1);

    let nodes = store
        .current_nodes("scope-c", Some(NodeType::Goal), AsOf::default())
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].status, NodeStatus::Irrelevant);
    assert_eq!(nodes[0].confidence, 0.65, "going stale must not touch confidence");

    let round_three = FactsSyncInput {
        scope_id: "scope-c".to_string(),
        created_by: "facts-worker".to_string(),
        goals: vec![IncomingFact {
            content: "ship v2 by end of quarter".to_string(),
            confidence: 0.65,
        }],
        ..Default::default()
    };
    let result_three = sync_facts(&store, &round_three).await.unwrap();
    assert_eq!(result_three.reactivated, 1);

    let nodes = store
        .current_nodes("scope-c", Some(NodeType::Goal), AsOf::default())
        .await
        .unwrap();
    assert_eq!(nodes[0].status, NodeStatus::Active);
    assert_eq!(nodes[0].confidence, 0.65);
}

/// A claim reported with strictly higher confidence in a later round is
/// applied, and a prefix-match against existing content still counts as the
/// same logical claim (content_matches allows either string to prefix the
/// other).
#[tokio::test]
async fn higher_confidence_and_prefix_matched_content_both_update_in_place() {
    let store = MemoryGraphStore::new();
    let first = FactsSyncInput {
        scope_id: "scope-d".to_string(),
        created_by: "facts-worker".to_string(),
        claims: claims(&[("budget is fixed", 0.5)]),
        ..Default::default()
    };
    sync_facts(&store, &first).await.unwrap();

    let second = FactsSyncInput {
        scope_id: "scope-d".to_string(),
        created_by: "facts-worker".to_string(),
        claims: claims(&[("budget is fixed for this fiscal year", 0.9)]),
        ..Default::default()
    };
    let result = sync_facts(&store, &second).await.unwrap();
    assert_eq!(result.inserted, 0, "a prefix match must update the existing node, not insert a new one");
    assert_eq!(result.confidence_updated, 1);

    let nodes = store
        .current_nodes("scope-d", Some(NodeType::Claim), AsOf::default())
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].confidence, 0.9);
}
