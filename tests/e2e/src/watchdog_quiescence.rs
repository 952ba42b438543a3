//! Scenario: quiescence with an unresolved contradiction. A scope goes
//! silent while otherwise near finality, but one contradiction was never
//! resolved — the watchdog must raise it first, ahead of any other gap,
//! and tag it critical. Also checks that the ranked list stays ordered by
//! phase first and potential gain only as a tiebreaker.

use governor_core::config::WatchdogConfig;
use governor_core::finality::FinalityThresholds;
use governor_core::governance::pending_review::{MemoryPendingReviewRegistry, PendingReviewRegistry};
use governor_core::graph::memory::MemoryGraphStore;
use governor_core::graph::{GraphStore, NewEdge, NewNode};
use governor_core::types::{EdgeType, NodeStatus, NodeType};
use governor_core::wal::MemoryWal;
use governor_core::watchdog::{Priority, Watchdog};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn immediate_quiescence_config() -> WatchdogConfig {
    WatchdogConfig {
        interval: Duration::from_millis(10),
        quiescence_threshold: Duration::from_millis(0),
    }
}

async fn claim(graph: &MemoryGraphStore, scope_id: &str, content: &str, confidence: f64) -> uuid::Uuid {
    graph
        .insert_node(NewNode {
            scope_id: scope_id.to_string(),
            node_type: NodeType::Claim,
            content: content.to_string(),
            confidence,
            status: NodeStatus::Active,
            source_ref: None,
            metadata: json!({}),
            created_by: "facts-worker".to_string(),
        })
        .await
        .unwrap()
        .node_id
}

async fn resolved_goal(graph: &MemoryGraphStore, scope_id: &str, content: &str) {
    let node = graph
        .insert_node(NewNode {
            scope_id: scope_id.to_string(),
            node_type: NodeType::Goal,
            content: content.to_string(),
            confidence: 1.0,
            status: NodeStatus::Active,
            source_ref: None,
            metadata: json!({}),
            created_by: "facts-worker".to_string(),
        })
        .await
        .unwrap();
    graph.set_status(node.node_id, NodeStatus::Resolved).await.unwrap();
}

#[tokio::test]
async fn unresolved_contradiction_is_raised_first_and_marked_critical() {
    let wal = Arc::new(MemoryWal::new());
    let graph = Arc::new(MemoryGraphStore::new());
    let pending = Arc::new(MemoryPendingReviewRegistry::new());
    let scope_id = "scope-quiet";

    // Claims, goals, and risk all look healthy; only the contradiction
    // between these two claims was never resolved.
    claim(&graph, scope_id, "high confidence claim one", 0.95).await;
    let a = claim(&graph, scope_id, "the API is stable", 0.9).await;
    let b = claim(&graph, scope_id, "the API changed last week", 0.9).await;
    graph
        .insert_edge(NewEdge {
            scope_id: scope_id.to_string(),
            source_id: a,
            target_id: b,
            edge_type: EdgeType::Contradicts,
            weight: 1.0,
            metadata: json!({}),
            created_by: "facts-worker".to_string(),
        })
        .await
        .unwrap();
    resolved_goal(&graph, scope_id, "ship the release").await;

    let watchdog = Watchdog::new(
        wal,
        graph,
        pending.clone(),
        immediate_quiescence_config(),
        FinalityThresholds::default(),
    );

    let questions = watchdog.tick(scope_id).await.unwrap();
    assert!(!questions.is_empty());
    assert_eq!(questions[0].dimension, "contradiction_resolution");
    assert_eq!(questions[0].priority, Priority::Critical);
    assert!(pending.is_pending(scope_id).await.unwrap());

    // The list stays sorted (phase_order ASC, potential_gain DESC).
    let phase_order = |d: &str| {
        governor_core::convergence::DIMENSION_WEIGHTS
            .iter()
            .position(|(name, _)| *name == d)
            .unwrap()
    };
    assert!(questions
        .windows(2)
        .all(|w| phase_order(&w[0].dimension) <= phase_order(&w[1].dimension)));
}

/// Resolving the contradiction (inserting a `resolves` edge) and ticking
/// again must not re-raise it — the watchdog is idempotent per pending
/// scope, and once resolved the dimension no longer has a gap at all.
#[tokio::test]
async fn resolving_the_contradiction_then_clearing_pending_stops_the_question_from_recurring() {
    let wal = Arc::new(MemoryWal::new());
    let graph = Arc::new(MemoryGraphStore::new());
    let pending = Arc::new(MemoryPendingReviewRegistry::new());
    let scope_id = "scope-resolved";

    let a = claim(&graph, scope_id, "the API is stable", 0.9).await;
    let b = claim(&graph, scope_id, "the API changed last week", 0.9).await;
    graph
        .insert_edge(NewEdge {
            scope_id: scope_id.to_string(),
            source_id: a,
            target_id: b,
            edge_type: EdgeType::Contradicts,
            weight: 1.0,
            metadata: json!({}),
            created_by: "facts-worker".to_string(),
        })
        .await
        .unwrap();

    let watchdog = Watchdog::new(
        wal,
        graph.clone(),
        pending.clone(),
        immediate_quiescence_config(),
        FinalityThresholds::default(),
    );

    let first = watchdog.tick(scope_id).await.unwrap();
    assert!(!first.is_empty());

    // A human resolves it and clears the pending review out-of-band.
    graph
        .insert_edge(NewEdge {
            scope_id: scope_id.to_string(),
            source_id: a,
            target_id: b,
            edge_type: EdgeType::Resolves,
            weight: 1.0,
            metadata: json!({}),
            created_by: "human".to_string(),
        })
        .await
        .unwrap();
    pending.resolve(scope_id).await.unwrap();

    let second = watchdog.tick(scope_id).await.unwrap();
    assert!(second.is_empty(), "once resolved, the contradiction dimension no longer has a gap");
}
