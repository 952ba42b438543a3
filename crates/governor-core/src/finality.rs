//! Finality evaluator: scores the current-view knowledge graph of a
//! scope along the four dimensions the convergence tracker also speaks, and
//! classifies the result against the configured near/auto thresholds.

use crate::convergence::{weighted_total, DimensionScores};
use crate::error::FinalityError;
use crate::graph::{AsOf, GraphStore};
use crate::types::{EdgeType, NodeStatus, NodeType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Near/auto classification thresholds. Mirrors [`crate::config::FinalityThresholds`]
/// but kept independent so finality.rs has no dependency on env parsing.
#[derive(Debug, Clone, Copy)]
pub struct FinalityThresholds {
    pub near: f64,
    pub auto: f64,
}

impl Default for FinalityThresholds {
    fn default() -> Self {
        Self {
            near: 0.75,
            auto: 0.92,
        }
    }
}

/// A claim whose confidence sits below this is counted as a blocker, not
/// just a drag on the claim-confidence dimension.
pub const LOW_CONFIDENCE_CLAIM_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityOutcome {
    NotConverged,
    Near,
    Auto,
}

/// A point-in-time scoring of a scope's knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalitySnapshot {
    pub scope_id: String,
    pub goal_score_total: f64,
    pub dimension_scores: DimensionScores,
    pub outcome: FinalityOutcome,
    pub blockers: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// `min(avg_conf / 0.85, 1)` — confidence is normalized against a target
/// ceiling rather than scored against the raw [0,1] range, so a scope of
/// claims averaging 0.85 or better already maxes this dimension.
fn claim_confidence_score(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 1.0;
    }
    let avg = confidences.iter().sum::<f64>() / confidences.len() as f64;
    (avg / 0.85).min(1.0)
}

fn contradiction_resolution_score(open: usize, resolved: usize) -> f64 {
    let total = open + resolved;
    if total == 0 {
        1.0
    } else {
        resolved as f64 / total as f64
    }
}

fn goal_completion_score(total_goals: usize, satisfied_goals: usize) -> f64 {
    if total_goals == 0 {
        1.0
    } else {
        satisfied_goals as f64 / total_goals as f64
    }
}

/// Risk is inverted: a scope with no open risks, or only low-confidence
/// ones, scores near 1.0. `risk_confidences` are the confidences of
/// currently-active risk nodes.
fn risk_score_inverse(risk_confidences: &[f64]) -> f64 {
    if risk_confidences.is_empty() {
        return 1.0;
    }
    let mean_risk = risk_confidences.iter().sum::<f64>() / risk_confidences.len() as f64;
    (1.0 - mean_risk).clamp(0.0, 1.0)
}

fn classify(goal_score_total: f64, thresholds: &FinalityThresholds) -> FinalityOutcome {
    if goal_score_total >= thresholds.auto {
        FinalityOutcome::Auto
    } else if goal_score_total >= thresholds.near {
        FinalityOutcome::Near
    } else {
        FinalityOutcome::NotConverged
    }
}

/// Loads a scope's current-view nodes and edges and scores them. A goal
/// node counts "satisfied" once it carries `NodeStatus::Resolved`; a
/// contradiction edge counts "resolved" once some `resolves` edge touches
/// either endpoint (mirroring the graph's own irreversibility rule).
pub async fn evaluate(
    scope_id: &str,
    graph: &dyn GraphStore,
    thresholds: &FinalityThresholds,
) -> Result<FinalitySnapshot, FinalityError> {
    let claims = graph
        .current_nodes(scope_id, Some(NodeType::Claim), AsOf::default())
        .await?;
    let goals = graph
        .current_nodes(scope_id, Some(NodeType::Goal), AsOf::default())
        .await?;
    let risks = graph
        .current_nodes(scope_id, Some(NodeType::Risk), AsOf::default())
        .await?;
    let contradiction_edges = graph
        .current_edges(scope_id, Some(EdgeType::Contradicts), AsOf::default())
        .await?;

    let active_claims: Vec<_> = claims
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .collect();
    let claim_confidences: Vec<f64> = active_claims.iter().map(|n| n.confidence).collect();

    let mut open_contradictions = 0usize;
    let mut resolved_contradictions = 0usize;
    for edge in &contradiction_edges {
        let source_resolved = graph
            .has_resolves_edge_touching(scope_id, edge.source_id)
            .await?;
        let target_resolved = graph
            .has_resolves_edge_touching(scope_id, edge.target_id)
            .await?;
        if source_resolved || target_resolved {
            resolved_contradictions += 1;
        } else {
            open_contradictions += 1;
        }
    }

    let satisfied_goals = goals
        .iter()
        .filter(|n| n.status == NodeStatus::Resolved)
        .count();

    let active_risks: Vec<_> = risks
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .collect();
    let risk_confidences: Vec<f64> = active_risks.iter().map(|n| n.confidence).collect();

    let dims = DimensionScores {
        claim_confidence: claim_confidence_score(&claim_confidences),
        contradiction_resolution: contradiction_resolution_score(
            open_contradictions,
            resolved_contradictions,
        ),
        goal_completion: goal_completion_score(goals.len(), satisfied_goals),
        risk_score_inverse: risk_score_inverse(&risk_confidences),
    };
    let goal_score_total = weighted_total(&dims);
    let outcome = classify(goal_score_total, thresholds);

    let mut blockers = Vec::new();
    if open_contradictions > 0 {
        blockers.push(format!("{open_contradictions} unresolved contradiction(s)"));
    }
    let low_confidence_claims = claim_confidences
        .iter()
        .filter(|c| **c < LOW_CONFIDENCE_CLAIM_THRESHOLD)
        .count();
    if low_confidence_claims > 0 {
        blockers.push(format!("{low_confidence_claims} low-confidence claim(s)"));
    }
    let unsatisfied_goals = goals.len().saturating_sub(satisfied_goals);
    if unsatisfied_goals > 0 {
        blockers.push(format!("{unsatisfied_goals} unresolved goal(s)"));
    }
    if !active_risks.is_empty() {
        blockers.push(format!("{} open risk(s)", active_risks.len()));
    }

    Ok(FinalitySnapshot {
        scope_id: scope_id.to_string(),
        goal_score_total,
        dimension_scores: dims,
        outcome,
        blockers,
        evaluated_at: Utc::now(),
    })
}
