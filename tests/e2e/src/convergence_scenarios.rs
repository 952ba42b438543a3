//! Drives the convergence tracker over point sequences derived from a real,
//! mutating knowledge graph (via the finality evaluator) rather than
//! hand-built dimension scores: steady convergence, plateau, a
//! single-dimension bottleneck, divergence, and the empty-scope case.

use governor_core::convergence::{compute_signals, ConvergenceConfig, ConvergencePoint};
use governor_core::finality::{self, FinalityOutcome, FinalityThresholds};
use governor_core::graph::memory::MemoryGraphStore;
use governor_core::graph::{GraphStore, NewEdge, NewNode};
use governor_core::types::{EdgeType, NodeStatus, NodeType};
use serde_json::json;

async fn snapshot_point(
    graph: &MemoryGraphStore,
    scope_id: &str,
    epoch: i64,
    thresholds: &FinalityThresholds,
) -> ConvergencePoint {
    let snapshot = finality::evaluate(scope_id, graph, thresholds).await.unwrap();
    ConvergencePoint::new(epoch, snapshot.dimension_scores, snapshot.evaluated_at)
}

async fn insert_claim(graph: &MemoryGraphStore, scope_id: &str, content: &str, confidence: f64) -> uuid::Uuid {
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

async fn insert_goal(graph: &MemoryGraphStore, scope_id: &str, content: &str) -> uuid::Uuid {
    graph
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
        .unwrap()
        .node_id
}

/// Scenario: steady convergence — each round raises a claim's confidence
/// and resolves one more goal, driving the real scope toward auto finality.
#[tokio::test]
async fn steady_convergence_over_real_graph_mutations_reaches_auto() {
    let graph = MemoryGraphStore::new();
    let thresholds = FinalityThresholds::default();
    let scope_id = "scope-steady";

    let claim_id = insert_claim(&graph, scope_id, "the rollout is on track", 0.5).await;
    let goal_ids = [
        insert_goal(&graph, scope_id, "finish migration").await,
        insert_goal(&graph, scope_id, "pass the audit").await,
    ];

    let mut points = Vec::new();
    points.push(snapshot_point(&graph, scope_id, 0, &thresholds).await);

    for (i, confidence) in [0.65, 0.8, 0.95, 0.97].into_iter().enumerate() {
        graph.update_confidence(claim_id, confidence).await.unwrap();
        if i < goal_ids.len() {
            graph.set_status(goal_ids[i], NodeStatus::Resolved).await.unwrap();
        }
        points.push(snapshot_point(&graph, scope_id, (i + 1) as i64, &thresholds).await);
    }

    let config = ConvergenceConfig::default();
    let signals = compute_signals(&points, &config, thresholds.auto);
    assert!(signals.is_monotonic, "each round strictly improved or held every dimension");
    assert!(signals.convergence_rate > 0.0);

    let final_snapshot = finality::evaluate(scope_id, &graph, &thresholds).await.unwrap();
    assert_eq!(final_snapshot.outcome, FinalityOutcome::Auto);
}

/// Scenario: plateau — re-syncing the same claim confidence round after
/// round (no new information) should read as stalled, not progressing.
#[tokio::test]
async fn repeated_rounds_at_a_fixed_confidence_read_as_plateaued() {
    let graph = MemoryGraphStore::new();
    let thresholds = FinalityThresholds::default();
    let scope_id = "scope-plateau";

    insert_claim(&graph, scope_id, "stuck claim", 0.7).await;

    let mut points = Vec::new();
    for epoch in 0..8 {
        points.push(snapshot_point(&graph, scope_id, epoch, &thresholds).await);
    }

    let config = ConvergenceConfig::default();
    let signals = compute_signals(&points, &config, thresholds.auto);
    assert!(signals.is_plateaued, "an unchanging score across many rounds must plateau");
    assert_eq!(signals.estimated_rounds, None, "a plateaued, below-threshold series has no ETA");
}

/// Scenario: one-dimension bottleneck — an unresolved contradiction holds
/// contradiction_resolution down while claims and goals are otherwise
/// healthy, so the tracker's pressure signal should single it out.
#[tokio::test]
async fn unresolved_contradiction_is_the_highest_pressure_dimension() {
    let graph = MemoryGraphStore::new();
    let thresholds = FinalityThresholds::default();
    let scope_id = "scope-bottleneck";

    insert_claim(&graph, scope_id, "high confidence claim", 0.97).await;
    let a = insert_claim(&graph, scope_id, "the API is stable", 0.9).await;
    let b = insert_claim(&graph, scope_id, "the API changed last week", 0.9).await;
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
    let goal = insert_goal(&graph, scope_id, "ship the release").await;
    graph.set_status(goal, NodeStatus::Resolved).await.unwrap();

    let mut points = Vec::new();
    for epoch in 0..5 {
        points.push(snapshot_point(&graph, scope_id, epoch, &thresholds).await);
    }

    let config = ConvergenceConfig::default();
    let signals = compute_signals(&points, &config, thresholds.auto);
    assert_eq!(
        signals.highest_pressure_dimension.as_deref(),
        Some("contradiction_resolution")
    );

    let snapshot = finality::evaluate(scope_id, &graph, &thresholds).await.unwrap();
    assert!(snapshot.blockers.iter().any(|b| b.contains("unresolved contradiction")));
    assert_ne!(snapshot.outcome, FinalityOutcome::Auto);
}

/// Scenario: empty scope — a scope with no nodes at all scores perfectly on
/// every dimension and converges in a single, zero-ETA point.
#[tokio::test]
async fn empty_scope_is_already_converged() {
    let graph = MemoryGraphStore::new();
    let thresholds = FinalityThresholds::default();
    let point = snapshot_point(&graph, "scope-empty", 0, &thresholds).await;
    assert!((point.goal_score - 1.0).abs() < 1e-9);
    assert!((point.lyapunov_v).abs() < 1e-9);

    let config = ConvergenceConfig::default();
    let signals = compute_signals(&[point], &config, thresholds.auto);
    assert_eq!(signals.estimated_rounds, Some(0));
}

/// Scenario: divergence — confidence actively eroding round over round
/// should read a negative convergence rate.
#[tokio::test]
async fn eroding_claim_confidence_reads_a_negative_rate() {
    let graph = MemoryGraphStore::new();
    let thresholds = FinalityThresholds::default();
    let scope_id = "scope-diverging";
    insert_claim(&graph, scope_id, "a shaky claim", 0.7).await;

    // The store's own confidence ratchet forbids a direct regression, so a
    // diverging scope is instead modeled the way it actually happens: a
    // superseding fact with strictly lower confidence is recorded as a new
    // current node, dragging the dimension average down round over round.
    let mut points = Vec::new();
    points.push(snapshot_point(&graph, scope_id, 0, &thresholds).await);
    let mut previous = graph
        .current_nodes(scope_id, Some(NodeType::Claim), Default::default())
        .await
        .unwrap()
        .remove(0);
    for (epoch, confidence) in [0.7, 0.5, 0.3, 0.1].into_iter().enumerate().skip(1) {
        let (epoch, confidence) = (epoch as i64, confidence);
        previous = graph
            .supersede_node(
                previous.node_id,
                NewNode {
                    scope_id: scope_id.to_string(),
                    node_type: NodeType::Claim,
                    content: previous.content.clone(),
                    confidence,
                    status: NodeStatus::Active,
                    source_ref: None,
                    metadata: json!({}),
                    created_by: "facts-worker".to_string(),
                },
            )
            .await
            .unwrap();
        points.push(snapshot_point(&graph, scope_id, epoch, &thresholds).await);
    }

    let config = ConvergenceConfig::default();
    let signals = compute_signals(&points, &config, thresholds.auto);
    assert!(signals.convergence_rate < 0.0);
    assert!(!signals.is_monotonic);
}
