//! Governance pipeline: deterministic evaluation, optional oversight
//! routing, and atomic commit of a proposal's outcome.

pub mod oversight;
pub mod pending_review;

use crate::bus::{subjects, BusMessage, ConsumeOptions, EventBus};
use crate::dedup::ProcessedRegistry;
use crate::error::GovernanceError;
use crate::finality::{self, FinalityThresholds};
use crate::graph::GraphStore;
use crate::metrics::MetricsExporter;
use crate::policy::{can_transition, get_for_scope, PolicyConfig};
use crate::state_machine::StateMachine;
use crate::types::{DriftSnapshot, EventEnvelope, Mode, Proposal};
use async_trait::async_trait;
use chrono::Utc;
use oversight::{CircuitBreaker, CircuitBreakerConfig, OversightRoute, OversightRouter};
use pending_review::PendingReviewRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Tag carried by every governance WAL entry, naming which path produced
/// the terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernancePath {
    #[serde(rename = "processProposal")]
    ProcessProposal,
    #[serde(rename = "oversight_acceptDeterministic")]
    OversightAcceptDeterministic,
    #[serde(rename = "oversight_escalateToLLM")]
    OversightEscalateToLlm,
    #[serde(rename = "oversight_escalateToHuman")]
    OversightEscalateToHuman,
    #[serde(rename = "processProposalWithAgent")]
    ProcessProposalWithAgent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignore,
    Approve,
    Reject,
    Pending,
}

#[derive(Debug, Clone)]
pub struct DeterministicResult {
    pub outcome: Outcome,
    pub reason: String,
    pub payload: serde_json::Value,
}

impl DeterministicResult {
    fn new(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
            payload: serde_json::json!({}),
        }
    }

    fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Abstracts the external permission service: `check(user, relation,
/// object)`, with an optional permissive fallback when unavailable.
#[async_trait]
pub trait PermissionClient: Send + Sync {
    async fn check(&self, user: &str, relation: &str, object: &str) -> PermissionDecision;
}

#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Always allows — used when no permission service is configured.
pub struct PermissiveFallback;

#[async_trait]
impl PermissionClient for PermissiveFallback {
    async fn check(&self, _user: &str, _relation: &str, _object: &str) -> PermissionDecision {
        PermissionDecision {
            allowed: true,
            reason: None,
        }
    }
}

/// Abstracts access to the current drift snapshot for a scope — produced
/// by the (out-of-scope) drift-analysis worker and surfaced here through
/// the narrow interface the governance pipeline needs.
#[async_trait]
pub trait DriftProvider: Send + Sync {
    async fn get_drift(&self, scope_id: &str) -> Result<DriftSnapshot, GovernanceError>;
}

/// Fixed drift snapshot, useful in tests and as a safe default when no
/// drift has been reported yet.
pub struct StaticDriftProvider(pub DriftSnapshot);

#[async_trait]
impl DriftProvider for StaticDriftProvider {
    async fn get_drift(&self, _scope_id: &str) -> Result<DriftSnapshot, GovernanceError> {
        Ok(self.0.clone())
    }
}

/// Resolves the effective policy for a scope.
pub trait PolicyProvider: Send + Sync {
    fn get_for_scope(&self, scope_id: &str) -> PolicyConfig;
}

pub struct StaticPolicyProvider(pub PolicyConfig);

impl PolicyProvider for StaticPolicyProvider {
    fn get_for_scope(&self, scope_id: &str) -> PolicyConfig {
        get_for_scope(scope_id, &self.0)
    }
}

/// Phase A: deterministic evaluation, pure given its loaded inputs (the
/// eight-step check in order below), with the permission check result
/// supplied by the caller since performing that check is I/O.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_deterministic(
    proposal: &Proposal,
    current_epoch: i64,
    drift: &DriftSnapshot,
    policy: &PolicyConfig,
    permission: &PermissionDecision,
) -> DeterministicResult {
    if proposal.proposed_action != "advance_state" {
        return DeterministicResult::new(Outcome::Ignore, "non advance_state proposal");
    }

    if current_epoch != proposal.payload.expected_epoch {
        return DeterministicResult::new(Outcome::Reject, "state_epoch_mismatch");
    }

    if proposal.mode == Mode::Master {
        return DeterministicResult::new(Outcome::Approve, "master_override").with_payload(
            serde_json::json!({ "from": proposal.payload.from, "to": proposal.payload.to }),
        );
    }

    let decision = can_transition(proposal.payload.from, proposal.payload.to, drift, policy);
    if !decision.allowed {
        return DeterministicResult::new(Outcome::Pending, decision.reason.clone()).with_payload(
            serde_json::json!({
                "type": "governance_review",
                "drift_level": drift.level,
                "drift_types": drift.types,
                "block_reason": decision.reason,
            }),
        );
    }

    if !permission.allowed {
        let reason = permission.reason.clone().unwrap_or_else(|| "policy_denied".to_string());
        return DeterministicResult::new(Outcome::Reject, reason);
    }

    if proposal.mode == Mode::Mitl {
        return DeterministicResult::new(Outcome::Pending, "mitl_required").with_payload(
            serde_json::json!({ "from": proposal.payload.from, "to": proposal.payload.to }),
        );
    }

    DeterministicResult::new(Outcome::Approve, "policy_passed").with_payload(serde_json::json!({
        "from": proposal.payload.from,
        "to": proposal.payload.to,
    }))
}

/// Assembles the components a running governance pipeline needs.
pub struct GovernancePipeline {
    pub bus: Arc<dyn EventBus>,
    pub wal: Arc<dyn crate::wal::WriteAheadLog>,
    pub state_machine: Arc<dyn StateMachine>,
    pub drift: Arc<dyn DriftProvider>,
    pub policy: Arc<dyn PolicyProvider>,
    pub permission: Arc<dyn PermissionClient>,
    pub oversight: Arc<dyn OversightRouter>,
    pub pending_review: Arc<dyn PendingReviewRegistry>,
    pub metrics: Arc<dyn MetricsExporter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
}

impl GovernancePipeline {
    pub fn new(
        bus: Arc<dyn EventBus>,
        wal: Arc<dyn crate::wal::WriteAheadLog>,
        state_machine: Arc<dyn StateMachine>,
        drift: Arc<dyn DriftProvider>,
        policy: Arc<dyn PolicyProvider>,
        permission: Arc<dyn PermissionClient>,
        oversight: Arc<dyn OversightRouter>,
        pending_review: Arc<dyn PendingReviewRegistry>,
        metrics: Arc<dyn MetricsExporter>,
    ) -> Self {
        Self {
            bus,
            wal,
            state_machine,
            drift,
            policy,
            permission,
            oversight,
            pending_review,
            metrics,
            circuit_breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        }
    }

    /// Runs the full pipeline for one proposal: loads state/drift/policy,
    /// evaluates Phase A, applies Phase B when applicable, and commits
    /// Phase C. Returns the governance path tag for the caller's tracing.
    pub async fn process(&self, proposal: &Proposal) -> Result<GovernancePath, GovernanceError> {
        if proposal.proposed_action != "advance_state" {
            return Ok(GovernancePath::ProcessProposal);
        }

        let scope_id = scope_id_of(proposal);
        let state = self
            .state_machine
            .get_state(&scope_id)
            .await?
            .ok_or_else(|| GovernanceError::StateMachine(crate::error::StateMachineError::ScopeNotFound(scope_id.clone())))?;

        let drift = self.drift.get_drift(&scope_id).await?;
        let policy = self.policy.get_for_scope(&scope_id);

        let permission = if proposal.mode == Mode::Master {
            PermissionDecision {
                allowed: true,
                reason: None,
            }
        } else {
            let decision = self
                .permission
                .check(&proposal.agent, "writer", &proposal.target_node)
                .await;
            PermissionDecision {
                allowed: decision.allowed,
                reason: decision.reason,
            }
        };

        let deterministic = evaluate_deterministic(proposal, state.epoch, &drift, &policy, &permission);

        if deterministic.outcome == Outcome::Ignore {
            return Ok(GovernancePath::ProcessProposal);
        }

        let (final_outcome, final_reason, final_payload, path) = if proposal.mode == Mode::Yolo {
            self.apply_oversight(proposal, deterministic).await
        } else {
            (
                deterministic.outcome,
                deterministic.reason,
                deterministic.payload,
                GovernancePath::ProcessProposal,
            )
        };

        self.commit(proposal, &scope_id, final_outcome, &final_reason, final_payload, path)
            .await?;
        Ok(path)
    }

    /// Phase B: routes who decides. Never overrides approve/reject/pending
    /// with a different verdict of its own — `EscalateToHuman` converts an
    /// approve/reject into a pending review but does not fabricate a new
    /// decision.
    async fn apply_oversight(
        &self,
        proposal: &Proposal,
        deterministic: DeterministicResult,
    ) -> (Outcome, String, serde_json::Value, GovernancePath) {
        if self.circuit_breaker.check("oversight").is_err() {
            return (
                deterministic.outcome,
                deterministic.reason,
                deterministic.payload,
                GovernancePath::OversightAcceptDeterministic,
            );
        }

        let summary = serde_json::json!({
            "proposal_id": proposal.proposal_id,
            "agent": proposal.agent,
            "deterministic_outcome": format!("{:?}", deterministic.outcome),
        });
        let route = match self.oversight.route(&summary, &deterministic.reason).await {
            Ok(route) => {
                self.circuit_breaker.record_success();
                route
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                warn!(proposal_id = %proposal.proposal_id, error = %e, "oversight call failed; accepting deterministic result");
                return (
                    deterministic.outcome,
                    deterministic.reason,
                    deterministic.payload,
                    GovernancePath::OversightAcceptDeterministic,
                );
            }
        };

        match route {
            OversightRoute::AcceptDeterministic => (
                deterministic.outcome,
                deterministic.reason,
                deterministic.payload,
                GovernancePath::OversightAcceptDeterministic,
            ),
            OversightRoute::EscalateToHuman => (
                Outcome::Pending,
                "oversight_escalated_to_human".to_string(),
                deterministic.payload,
                GovernancePath::OversightEscalateToHuman,
            ),
            // No full-LLM decider is wired in by default; fall back to the
            // deterministic result but still tag the escalation path for audit.
            OversightRoute::EscalateToFullLlmDecider => (
                deterministic.outcome,
                deterministic.reason,
                deterministic.payload,
                GovernancePath::OversightEscalateToLlm,
            ),
        }
    }

    async fn commit(
        &self,
        proposal: &Proposal,
        scope_id: &str,
        outcome: Outcome,
        reason: &str,
        payload: serde_json::Value,
        path: GovernancePath,
    ) -> Result<(), GovernanceError> {
        match outcome {
            Outcome::Ignore => Ok(()),
            Outcome::Approve => {
                self.bus
                    .publish(
                        subjects::ACTIONS_ADVANCE_STATE,
                        serde_json::json!({
                            "proposal_id": proposal.proposal_id,
                            "scope_id": scope_id,
                            "reason": reason,
                            "payload": payload,
                        }),
                    )
                    .await?;
                self.append_wal(proposal, scope_id, "proposal_approved", reason, &payload, path)
                    .await?;
                self.metrics
                    .increment_counter("proposals_total", &[("outcome", "approved")]);
                info!(proposal_id = %proposal.proposal_id, scope_id, %reason, governance_path = ?path, "proposal approved");
                Ok(())
            }
            Outcome::Reject => {
                self.bus
                    .publish(
                        &subjects::rejection(&proposal.proposed_action),
                        serde_json::json!({
                            "proposal_id": proposal.proposal_id,
                            "scope_id": scope_id,
                            "reason": reason,
                        }),
                    )
                    .await?;
                self.append_wal(proposal, scope_id, "proposal_rejected", reason, &payload, path)
                    .await?;
                if reason == "policy_denied" {
                    self.metrics
                        .increment_counter("policy_violations_total", &[]);
                }
                self.metrics
                    .increment_counter("proposals_total", &[("outcome", "rejected")]);
                warn!(proposal_id = %proposal.proposal_id, scope_id, %reason, governance_path = ?path, "proposal rejected");
                Ok(())
            }
            Outcome::Pending => {
                self.pending_review
                    .insert_pending(scope_id, proposal.proposal_id, payload.clone())
                    .await?;
                self.bus
                    .publish(
                        &subjects::pending_approval(&proposal.proposal_id),
                        serde_json::json!({ "status": "pending" }),
                    )
                    .await?;
                self.append_wal(proposal, scope_id, "proposal_pending_approval", reason, &payload, path)
                    .await?;
                self.metrics
                    .increment_counter("proposals_total", &[("outcome", "pending")]);
                info!(proposal_id = %proposal.proposal_id, scope_id, %reason, governance_path = ?path, "proposal pending human review");
                Ok(())
            }
        }
    }

    async fn append_wal(
        &self,
        proposal: &Proposal,
        scope_id: &str,
        event_type: &str,
        reason: &str,
        payload: &serde_json::Value,
        path: GovernancePath,
    ) -> Result<(), GovernanceError> {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            ts: Utc::now(),
            source: "governance".to_string(),
            correlation_id: Some(proposal.proposal_id),
            payload: serde_json::json!({
                "scope_id": scope_id,
                "reason": reason,
                "governance_path": path,
                "detail": payload,
            }),
        };
        self.wal.append(envelope).await?;
        Ok(())
    }
}

fn scope_id_of(proposal: &Proposal) -> String {
    // The proposal's target_node is scoped as `{scope_id}/{node}` per the
    // wire convention; scope is whatever precedes the first `/`.
    proposal
        .target_node
        .split('/')
        .next()
        .unwrap_or(&proposal.target_node)
        .to_string()
}

/// Exponential backoff used by both consumer loops: starts at `initial`,
/// doubles on every empty fetch, caps at `max`.
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// The main consumer on `swarm.proposals.>`: dedups, decodes, routes
/// through the pipeline, and always publishes `swarm.finality.evaluate`
/// afterward so every commit is followed by a finality pass.
pub struct GovernanceLoop {
    pub bus: Arc<dyn EventBus>,
    pub dedup: Arc<dyn ProcessedRegistry>,
    pub pipeline: Arc<GovernancePipeline>,
    pub consumer_name: String,
    pub stream: String,
}

impl GovernanceLoop {
    /// Processes a single fetched message: dedup check, decode, pipeline,
    /// finality trigger, ack. Returns whether the message was handled
    /// (false means it was a duplicate and skipped).
    pub async fn handle_message(&self, message: &BusMessage) -> Result<bool, GovernanceError> {
        if !self
            .dedup
            .try_mark_processed(&self.consumer_name, &message.message_id)
            .await?
        {
            self.bus.ack(message).await?;
            return Ok(false);
        }

        let proposal: Proposal = serde_json::from_value(message.payload.clone())
            .map_err(|e| GovernanceError::Oversight(format!("malformed proposal: {e}")))?;

        self.pipeline.process(&proposal).await?;

        let scope_id = scope_id_of(&proposal);
        self.bus
            .publish(subjects::FINALITY_EVALUATE, serde_json::json!({ "scope_id": scope_id }))
            .await?;

        self.bus.ack(message).await?;
        Ok(true)
    }

    /// Runs until `shutdown` fires, applying the 500ms-5s backoff on empty
    /// fetches.
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) -> Result<(), GovernanceError> {
        self.bus
            .ensure_consumer(&self.stream, subjects::PROPOSALS_ALL, &self.consumer_name)
            .await?;
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let messages = self
                .bus
                .fetch(&self.stream, &self.consumer_name, ConsumeOptions::default())
                .await?;

            if messages.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(backoff.next_delay()) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
                continue;
            }

            backoff.reset();
            for message in &messages {
                if let Err(e) = self.handle_message(message).await {
                    warn!(error = %e, "governance handler failed; message will be redelivered");
                }
            }
        }
    }
}

/// The consumer on `swarm.finality.evaluate`: this is the *only* path that
/// runs C8 in production. A message is acked only once the finality pass
/// finishes, so a transient graph error leaves the message unacked and it
/// redelivers rather than silently dropping a scope's evaluation.
pub struct FinalityLoop {
    pub bus: Arc<dyn EventBus>,
    pub dedup: Arc<dyn ProcessedRegistry>,
    pub graph: Arc<dyn GraphStore>,
    pub thresholds: FinalityThresholds,
    pub metrics: Arc<dyn MetricsExporter>,
    pub consumer_name: String,
    pub stream: String,
}

impl FinalityLoop {
    /// Processes a single fetched message: dedup check, decode the scope,
    /// run the finality evaluator, record its result, ack. Returns whether
    /// the message was handled (false means it was a duplicate and
    /// skipped).
    pub async fn handle_message(&self, message: &BusMessage) -> Result<bool, GovernanceError> {
        if !self
            .dedup
            .try_mark_processed(&self.consumer_name, &message.message_id)
            .await?
        {
            self.bus.ack(message).await?;
            return Ok(false);
        }

        let scope_id = message
            .payload
            .get("scope_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GovernanceError::Oversight("finality message missing scope_id".to_string()))?
            .to_string();

        let snapshot = finality::evaluate(&scope_id, self.graph.as_ref(), &self.thresholds).await?;

        self.metrics.set_gauge(
            "governor_finality_goal_score",
            snapshot.goal_score_total,
            &[("scope_id", scope_id.as_str())],
        );
        info!(
            scope_id = %scope_id,
            outcome = ?snapshot.outcome,
            score = snapshot.goal_score_total,
            blockers = snapshot.blockers.len(),
            "finality evaluated"
        );

        self.bus.ack(message).await?;
        Ok(true)
    }

    /// Runs until `shutdown` fires, applying the same 500ms-5s backoff on
    /// empty fetches as [`GovernanceLoop::run`].
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) -> Result<(), GovernanceError> {
        self.bus
            .ensure_consumer(&self.stream, subjects::FINALITY_EVALUATE, &self.consumer_name)
            .await?;
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let messages = self
                .bus
                .fetch(&self.stream, &self.consumer_name, ConsumeOptions::default())
                .await?;

            if messages.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(backoff.next_delay()) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
                continue;
            }

            backoff.reset();
            for message in &messages {
                if let Err(e) = self.handle_message(message).await {
                    warn!(error = %e, "finality handler failed; message will be redelivered");
                }
            }
        }
    }
}
