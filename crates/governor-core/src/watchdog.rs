//! Quiescence watchdog: a heartbeat that wakes on an interval,
//! assesses whether a scope has gone quiet without resolving, and — only
//! then — raises a ranked question for a human, idempotently.
//!
//! Wakes on an interval, assesses, and acts only if the assessment calls
//! for it — rather than a plain cron job that always acts.

use crate::config::WatchdogConfig;
use crate::convergence::DIMENSION_WEIGHTS;
use crate::finality::{self, FinalityOutcome, FinalityThresholds};
use crate::governance::pending_review::PendingReviewRegistry;
use crate::graph::{AsOf, GraphStore};
use crate::types::{EdgeType, NodeStatus, NodeType};
use crate::wal::{WriteAheadLog, PIPELINE_EVENT_TYPES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How urgently a raised question should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Medium,
    High,
    Critical,
}

/// A gap small enough not to bother asking about (the ε in "gap > small_epsilon").
const SMALL_EPSILON: f64 = 1e-3;

/// A dimension below this is considered unhealthy enough to ask about —
/// the floor a phase's score must clear to be skipped.
const DIMENSION_HEALTH_FLOOR: f64 = 0.6;

/// Cap on concrete offenders fetched per phase.
const MAX_OFFENDERS: usize = 5;

/// One ranked question the watchdog wants a human to answer: one per phase
/// whose `gap = 1 - dim_score` exceeds [`SMALL_EPSILON`], carrying the
/// marginal finality gain (`potential_gain`) closing that phase would buy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogQuestion {
    pub scope_id: String,
    pub dimension: String,
    pub current_score: f64,
    pub weight: f64,
    pub potential_gain: f64,
    pub priority: Priority,
    pub question: String,
    pub suggested_action: String,
    pub blockers: Vec<String>,
    /// Up to [`MAX_OFFENDERS`] concrete examples grounding this question:
    /// contradiction pairs, lowest-confidence claims, or non-resolved
    /// goals, depending on `dimension`.
    pub offenders: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

fn priority_for(score: f64) -> Priority {
    if score < 0.3 {
        Priority::Critical
    } else if score < DIMENSION_HEALTH_FLOOR {
        Priority::High
    } else {
        Priority::Medium
    }
}

fn question_for(dimension: &str, scope_id: &str) -> String {
    match dimension {
        "contradiction_resolution" => {
            format!("Scope {scope_id} has unresolved contradictions blocking progress — which claim should win?")
        }
        "claim_confidence" => {
            format!("Scope {scope_id} has low-confidence claims — can you confirm or correct them?")
        }
        "goal_completion" => {
            format!("Scope {scope_id} has outstanding goals with no recent movement — are they still in scope?")
        }
        "risk_score_inverse" => {
            format!("Scope {scope_id} has open risks — should they be accepted, mitigated, or escalated?")
        }
        other => format!("Scope {scope_id} needs attention on {other}."),
    }
}

fn suggested_action_for(dimension: &str) -> String {
    match dimension {
        "contradiction_resolution" => "Resolve the listed contradiction pairs with a `resolves` edge.".to_string(),
        "claim_confidence" => "Confirm or correct the lowest-confidence claims listed below.".to_string(),
        "goal_completion" => "Mark outstanding goals resolved, or drop them from scope.".to_string(),
        "risk_score_inverse" => "Accept, mitigate, or escalate the open risks listed below.".to_string(),
        _ => "Review the dimension and its offenders below.".to_string(),
    }
}

/// Fetches up to [`MAX_OFFENDERS`] concrete examples for a dimension's gap:
/// contradiction pairs, lowest-confidence claims, non-resolved goals, or —
/// following the same shape — the open risk nodes themselves.
async fn fetch_offenders(
    dimension: &str,
    scope_id: &str,
    graph: &dyn GraphStore,
) -> Result<Vec<String>, crate::error::GraphError> {
    match dimension {
        "contradiction_resolution" => {
            let edges = graph
                .current_edges(scope_id, Some(EdgeType::Contradicts), AsOf::default())
                .await?;
            let mut offenders = Vec::new();
            for edge in &edges {
                if offenders.len() >= MAX_OFFENDERS {
                    break;
                }
                let source_resolved = graph.has_resolves_edge_touching(scope_id, edge.source_id).await?;
                let target_resolved = graph.has_resolves_edge_touching(scope_id, edge.target_id).await?;
                if source_resolved || target_resolved {
                    continue;
                }
                let source = graph.get_node(edge.source_id).await?;
                let target = graph.get_node(edge.target_id).await?;
                offenders.push(format!("\"{}\" vs \"{}\"", source.content, target.content));
            }
            Ok(offenders)
        }
        "claim_confidence" => {
            let mut claims = graph
                .current_nodes(scope_id, Some(NodeType::Claim), AsOf::default())
                .await?;
            claims.retain(|n| n.status == NodeStatus::Active);
            claims.sort_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal));
            Ok(claims
                .into_iter()
                .take(MAX_OFFENDERS)
                .map(|n| format!("{} (confidence {:.2})", n.content, n.confidence))
                .collect())
        }
        "goal_completion" => {
            let goals = graph
                .current_nodes(scope_id, Some(NodeType::Goal), AsOf::default())
                .await?;
            Ok(goals
                .into_iter()
                .filter(|n| n.status != NodeStatus::Resolved)
                .take(MAX_OFFENDERS)
                .map(|n| n.content)
                .collect())
        }
        "risk_score_inverse" => {
            let risks = graph
                .current_nodes(scope_id, Some(NodeType::Risk), AsOf::default())
                .await?;
            Ok(risks
                .into_iter()
                .filter(|n| n.status == NodeStatus::Active)
                .take(MAX_OFFENDERS)
                .map(|n| n.content)
                .collect())
        }
        _ => Ok(Vec::new()),
    }
}

/// Builds one [`WatchdogQuestion`] per phase in [`DIMENSION_WEIGHTS`] order
/// whose gap exceeds [`SMALL_EPSILON`], then sorts by `(phase_order ASC,
/// potential_gain DESC)` so the list stays ordered by phase first and only
/// breaks ties by potential gain. An empty result means every dimension is
/// within its gap tolerance — the caller should not raise anything.
async fn rank_questions(
    scope_id: &str,
    snapshot: &finality::FinalitySnapshot,
    graph: &dyn GraphStore,
) -> Result<Vec<WatchdogQuestion>, crate::error::GraphError> {
    let mut questions: Vec<(usize, WatchdogQuestion)> = Vec::new();
    for (phase_order, (dimension, weight)) in DIMENSION_WEIGHTS.iter().enumerate() {
        let Some(score) = snapshot.dimension_scores.get(dimension) else {
            continue;
        };
        let gap = 1.0 - score;
        if gap <= SMALL_EPSILON {
            continue;
        }
        let offenders = fetch_offenders(dimension, scope_id, graph).await?;
        questions.push((
            phase_order,
            WatchdogQuestion {
                scope_id: scope_id.to_string(),
                dimension: dimension.to_string(),
                current_score: score,
                weight: *weight,
                potential_gain: gap * weight,
                priority: priority_for(score),
                question: question_for(dimension, scope_id),
                suggested_action: suggested_action_for(dimension),
                blockers: snapshot.blockers.clone(),
                offenders,
                raised_at: Utc::now(),
            },
        ));
    }
    questions.sort_by(|(a_phase, a_q), (b_phase, b_q)| {
        a_phase
            .cmp(b_phase)
            .then(b_q.potential_gain.partial_cmp(&a_q.potential_gain).unwrap_or(std::cmp::Ordering::Equal))
    });
    Ok(questions.into_iter().map(|(_, q)| q).collect())
}

/// A compact human-readable summary of a batch of ranked questions.
fn summarize(scope_id: &str, questions: &[WatchdogQuestion]) -> String {
    if questions.is_empty() {
        return format!("scope {scope_id}: no open questions");
    }
    let top = &questions[0];
    format!(
        "scope {scope_id}: {} open question(s), top priority {:?} on {} (score {:.2}, potential gain {:.3})",
        questions.len(),
        top.priority,
        top.dimension,
        top.current_score,
        top.potential_gain,
    )
}

/// Tracks, per scope, whether pipeline WAL activity has gone quiet for
/// longer than [`WatchdogConfig::quiescence_threshold`].
pub struct QuiescenceTracker {
    threshold: std::time::Duration,
}

impl QuiescenceTracker {
    pub fn new(threshold: std::time::Duration) -> Self {
        Self { threshold }
    }

    /// A scope is quiescent when its most recent pipeline event is older
    /// than the threshold, or there has never been one at all (a scope that
    /// bootstrapped and then saw no further activity is quiescent too).
    pub fn is_quiescent(&self, last_pipeline_event_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_pipeline_event_at {
            Some(ts) => now.signed_duration_since(ts).to_std().unwrap_or_default() >= self.threshold,
            None => true,
        }
    }
}

/// Ties a WAL, a graph store, and a pending-review registry together into a
/// periodic tick loop.
pub struct Watchdog {
    wal: Arc<dyn WriteAheadLog>,
    graph: Arc<dyn GraphStore>,
    pending_review: Arc<dyn PendingReviewRegistry>,
    config: WatchdogConfig,
    finality_thresholds: FinalityThresholds,
}

impl Watchdog {
    pub fn new(
        wal: Arc<dyn WriteAheadLog>,
        graph: Arc<dyn GraphStore>,
        pending_review: Arc<dyn PendingReviewRegistry>,
        config: WatchdogConfig,
        finality_thresholds: FinalityThresholds,
    ) -> Self {
        Self {
            wal,
            graph,
            pending_review,
            config,
            finality_thresholds,
        }
    }

    /// Runs one assessment for `scope_id`. Returns the ranked questions
    /// submitted, if any — empty both when the scope isn't quiescent and
    /// when it is quiescent but already converged or already has a pending
    /// review. Submission is idempotent per scope: a scope with a pending
    /// review never gets a second batch until it's resolved.
    pub async fn tick(&self, scope_id: &str) -> Result<Vec<WatchdogQuestion>, crate::error::GovernorError> {
        let tracker = QuiescenceTracker::new(self.config.quiescence_threshold);
        let latest_seq = self.wal.latest_seq_for_types(PIPELINE_EVENT_TYPES).await?;
        let last_event_at = match latest_seq {
            Some(seq) => self
                .wal
                .since(seq.saturating_sub(1), 1)
                .await?
                .into_iter()
                .next()
                .map(|e| e.ts),
            None => None,
        };

        if !tracker.is_quiescent(last_event_at, Utc::now()) {
            return Ok(Vec::new());
        }

        if self.pending_review.is_pending(scope_id).await? {
            return Ok(Vec::new());
        }

        let snapshot = finality::evaluate(scope_id, self.graph.as_ref(), &self.finality_thresholds).await?;
        if snapshot.outcome == FinalityOutcome::Auto {
            return Ok(Vec::new());
        }

        let questions = rank_questions(scope_id, &snapshot, self.graph.as_ref()).await?;
        if questions.is_empty() {
            return Ok(Vec::new());
        }

        let summary = summarize(scope_id, &questions);
        self.pending_review
            .insert_pending(
                scope_id,
                uuid::Uuid::new_v4(),
                serde_json::json!({ "summary": summary, "questions": questions }),
            )
            .await
            .map_err(|e| crate::error::GovernorError::Internal(e.to_string()))?;

        info!(
            scope_id,
            dimension = questions[0].dimension.as_str(),
            priority = ?questions[0].priority,
            count = questions.len(),
            "watchdog raised ranked questions"
        );
        Ok(questions)
    }

    /// Runs `tick` against every scope in `scope_ids` on `config.interval`,
    /// until `shutdown` is cancelled.
    pub async fn run(&self, scope_ids: Vec<String>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("watchdog shutting down");
                    return;
                }
                _ = interval.tick() => {
                    for scope_id in &scope_ids {
                        if let Err(err) = self.tick(scope_id).await {
                            warn!(scope_id, error = %err, "watchdog tick failed");
                        }
                    }
                }
            }
        }
    }
}
