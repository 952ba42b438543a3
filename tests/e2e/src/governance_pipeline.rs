//! Drives the governance pipeline end-to-end over the in-memory bus,
//! WAL, state machine, and pending-review registry: a drift-driven
//! rejection, a policy-blocked transition, and an oversight escalation
//! that still commits atomically with the WAL and bus in lockstep.

use governor_core::dedup::MemoryProcessedRegistry;
use governor_core::governance::oversight::NoOversight;
use governor_core::governance::pending_review::{MemoryPendingReviewRegistry, PendingReviewRegistry};
use governor_core::governance::{
    GovernanceLoop, GovernancePipeline, PermissionDecision, PermissiveFallback, PolicyProvider,
    StaticDriftProvider,
};
use governor_core::metrics::NullExporter;
use governor_core::policy::{BlockWhen, PolicyConfig, TransitionRule};
use governor_core::state_machine::{MemoryStateMachine, StateMachine};
use governor_core::types::{DriftLevel, DriftSnapshot, Mode, Proposal, ProposalPayload, WorkflowNode};
use governor_core::wal::{MemoryWal, WriteAheadLog};
use governor_core::bus::memory::MemoryEventBus;
use governor_core::bus::{subjects, EventBus};
use std::sync::Arc;
use uuid::Uuid;

struct StaticPolicy(PolicyConfig);

impl PolicyProvider for StaticPolicy {
    fn get_for_scope(&self, _scope_id: &str) -> PolicyConfig {
        self.0.clone()
    }
}

fn critical_drift_policy() -> PolicyConfig {
    PolicyConfig {
        mode: Mode::Yolo,
        transition_rules: vec![TransitionRule {
            from: WorkflowNode::DriftChecked,
            to: WorkflowNode::ContextIngested,
            block_when: BlockWhen {
                drift_level: vec![DriftLevel::Critical],
            },
            reason: "critical drift blocks restart".to_string(),
        }],
        rules: vec![],
        scopes: Default::default(),
    }
}

async fn bootstrapped_scope(
    state_machine: &dyn StateMachine,
    scope_id: &str,
) -> governor_core::types::ScopeState {
    let state = state_machine.bootstrap(scope_id, Uuid::new_v4()).await.unwrap();
    // Two real advances bring the scope to DriftChecked so our probe proposal
    // (DriftChecked -> ContextIngested) is in the right starting node.
    let state = state_machine
        .advance(scope_id, state.epoch, Default::default())
        .await
        .unwrap()
        .unwrap();
    state_machine
        .advance(scope_id, state.epoch, Default::default())
        .await
        .unwrap()
        .unwrap()
}

fn advance_proposal(mode: Mode, expected_epoch: i64) -> Proposal {
    Proposal {
        proposal_id: Uuid::new_v4(),
        agent: "drift-worker".to_string(),
        proposed_action: "advance_state".to_string(),
        target_node: "scope-1/DriftChecked".to_string(),
        payload: ProposalPayload {
            expected_epoch,
            from: WorkflowNode::DriftChecked,
            to: WorkflowNode::ContextIngested,
        },
        mode,
    }
}

/// YOLO mode, critical drift on a blocked transition -> pending with a
/// governance_review payload capturing the drift snapshot.
#[tokio::test]
async fn yolo_with_critical_drift_on_blocked_transition_pends_for_review() {
    let wal = Arc::new(MemoryWal::new());
    let state_machine = Arc::new(MemoryStateMachine::new(wal.clone()));
    let scope_state = bootstrapped_scope(state_machine.as_ref(), "scope-1").await;
    assert_eq!(scope_state.last_node, WorkflowNode::DriftChecked);

    let bus = Arc::new(MemoryEventBus::new());
    let pending_review = Arc::new(MemoryPendingReviewRegistry::new());
    let pipeline = GovernancePipeline::new(
        bus.clone(),
        wal.clone(),
        state_machine.clone(),
        Arc::new(StaticDriftProvider(DriftSnapshot {
            level: DriftLevel::Critical,
            types: vec!["schema_change".to_string()],
        })),
        Arc::new(StaticPolicy(critical_drift_policy())),
        Arc::new(PermissiveFallback),
        Arc::new(NoOversight),
        pending_review.clone(),
        Arc::new(NullExporter),
    );

    let proposal = advance_proposal(Mode::Yolo, scope_state.epoch);
    pipeline.process(&proposal).await.unwrap();

    assert!(pending_review.is_pending("scope-1").await.unwrap());
    let review = pending_review.get_pending("scope-1").await.unwrap().unwrap();
    assert_eq!(review.payload["type"], "governance_review");
    assert_eq!(review.payload["drift_level"], "critical");

    let tail = wal.tail(10).await.unwrap();
    let terminal = tail
        .iter()
        .find(|e| e.data.event_type == "proposal_pending_approval")
        .expect("a pending-approval WAL entry");
    // YOLO routes every non-ignored outcome through Phase B; NoOversight
    // always accepts the deterministic verdict, so the tag is
    // oversight_acceptDeterministic rather than bare processProposal.
    assert_eq!(terminal.data.payload["governance_path"], "oversight_acceptDeterministic");

    // Scope's epoch must not have moved: a pending outcome never touches
    // the state machine.
    let state = state_machine.get_state("scope-1").await.unwrap().unwrap();
    assert_eq!(state.epoch, scope_state.epoch);
}

/// The same proposal under MASTER mode overrides the drift block entirely
/// and approves.
#[tokio::test]
async fn master_override_approves_regardless_of_drift() {
    let wal = Arc::new(MemoryWal::new());
    let state_machine = Arc::new(MemoryStateMachine::new(wal.clone()));
    let scope_state = bootstrapped_scope(state_machine.as_ref(), "scope-2").await;

    let bus = Arc::new(MemoryEventBus::new());
    let pending_review = Arc::new(MemoryPendingReviewRegistry::new());
    let pipeline = GovernancePipeline::new(
        bus.clone(),
        wal.clone(),
        state_machine.clone(),
        Arc::new(StaticDriftProvider(DriftSnapshot {
            level: DriftLevel::Critical,
            types: vec!["schema_change".to_string()],
        })),
        Arc::new(StaticPolicy(critical_drift_policy())),
        Arc::new(PermissiveFallback),
        Arc::new(NoOversight),
        pending_review.clone(),
        Arc::new(NullExporter),
    );

    let mut proposal = advance_proposal(Mode::Master, scope_state.epoch);
    proposal.target_node = "scope-2/DriftChecked".to_string();
    pipeline.process(&proposal).await.unwrap();

    assert!(!pending_review.is_pending("scope-2").await.unwrap());
    let tail = wal.tail(10).await.unwrap();
    let terminal = tail
        .iter()
        .find(|e| e.data.event_type == "proposal_approved")
        .expect("an approval WAL entry");
    assert_eq!(terminal.data.payload["reason"], "master_override");

    // Phase C's approve path only publishes to swarm.actions.advance_state;
    // a separate consumer applies the actual epoch bump. A fresh consumer's
    // next_index starts at zero, so it still sees the message published
    // before it was created.
    bus.ensure_consumer("swarm", subjects::ACTIONS_ADVANCE_STATE, "checker")
        .await
        .unwrap();
    let advance_messages = bus
        .fetch("swarm", "checker", Default::default())
        .await
        .unwrap();
    assert_eq!(advance_messages.len(), 1);
    assert_eq!(advance_messages[0].payload["scope_id"], "scope-2");
}

/// Exactly-once effect: redelivering the same message never runs the
/// pipeline twice, because the governance loop's handler checks the
/// processed-message registry before touching the pipeline at all.
#[tokio::test]
async fn redelivered_proposal_is_processed_at_most_once() {
    let wal = Arc::new(MemoryWal::new());
    let state_machine = Arc::new(MemoryStateMachine::new(wal.clone()));
    let scope_state = state_machine.bootstrap("scope-3", Uuid::new_v4()).await.unwrap();

    let bus = Arc::new(MemoryEventBus::new());
    let pending_review = Arc::new(MemoryPendingReviewRegistry::new());
    let pipeline = Arc::new(GovernancePipeline::new(
        bus.clone(),
        wal.clone(),
        state_machine.clone(),
        Arc::new(StaticDriftProvider(DriftSnapshot {
            level: DriftLevel::None,
            types: vec![],
        })),
        Arc::new(StaticPolicy(PolicyConfig {
            mode: Mode::Yolo,
            transition_rules: vec![],
            rules: vec![],
            scopes: Default::default(),
        })),
        Arc::new(PermissiveFallback),
        Arc::new(NoOversight),
        pending_review.clone(),
        Arc::new(NullExporter),
    ));

    let dedup = Arc::new(MemoryProcessedRegistry::new());
    let governance_loop = GovernanceLoop {
        bus: bus.clone(),
        dedup: dedup.clone(),
        pipeline: pipeline.clone(),
        consumer_name: "governance".to_string(),
        stream: "swarm".to_string(),
    };

    bus.ensure_consumer("swarm", subjects::PROPOSALS_ALL, "governance")
        .await
        .unwrap();

    let proposal = Proposal {
        proposal_id: Uuid::new_v4(),
        agent: "drift-worker".to_string(),
        proposed_action: "advance_state".to_string(),
        target_node: "scope-3/ContextIngested".to_string(),
        payload: ProposalPayload {
            expected_epoch: scope_state.epoch,
            from: WorkflowNode::ContextIngested,
            to: WorkflowNode::FactsExtracted,
        },
        mode: Mode::Yolo,
    };
    bus.publish(&subjects::proposal("drift-worker"), serde_json::to_value(&proposal).unwrap())
        .await
        .unwrap();

    let messages = bus
        .fetch("swarm", "governance", Default::default())
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);

    let handled_first = governance_loop.handle_message(&messages[0]).await.unwrap();
    assert!(handled_first);

    // Simulate redelivery: the same message_id is handled again without a
    // fresh fetch (the broker's at-least-once retry).
    let handled_second = governance_loop.handle_message(&messages[0]).await.unwrap();
    assert!(!handled_second, "a redelivered message must be a no-op");

    // Approval only publishes swarm.actions.advance_state; the epoch bump
    // itself is applied by a separate consumer, out of scope here. What this
    // property actually guarantees is that the approve path ran exactly
    // once, not twice, for the one proposal.
    bus.ensure_consumer("swarm", subjects::ACTIONS_ADVANCE_STATE, "checker")
        .await
        .unwrap();
    let advance_messages = bus
        .fetch("swarm", "checker", Default::default())
        .await
        .unwrap();
    assert_eq!(advance_messages.len(), 1, "the approval must fire exactly once despite redelivery");

    let tail = wal.tail(10).await.unwrap();
    let approvals = tail
        .iter()
        .filter(|e| e.data.event_type == "proposal_approved")
        .count();
    assert_eq!(approvals, 1);
}

/// Epoch monotonicity under a concurrent race: two callers sharing the
/// same `expected_epoch` must see exactly one success.
#[tokio::test]
async fn concurrent_advance_attempts_at_the_same_epoch_yield_exactly_one_winner() {
    let wal = Arc::new(MemoryWal::new());
    let state_machine = Arc::new(MemoryStateMachine::new(wal.clone()));
    let scope_state = state_machine.bootstrap("scope-race", Uuid::new_v4()).await.unwrap();

    let a = {
        let sm = state_machine.clone();
        let epoch = scope_state.epoch;
        tokio::spawn(async move { sm.advance("scope-race", epoch, Default::default()).await.unwrap() })
    };
    let b = {
        let sm = state_machine.clone();
        let epoch = scope_state.epoch;
        tokio::spawn(async move { sm.advance("scope-race", epoch, Default::default()).await.unwrap() })
    };

    let (ra, rb) = tokio::join!(a, b);
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    let winners = [ra.is_some(), rb.is_some()].iter().filter(|x| **x).count();
    assert_eq!(winners, 1, "exactly one racer should observe a matching epoch");

    let state = state_machine.get_state("scope-race").await.unwrap().unwrap();
    assert_eq!(state.epoch, scope_state.epoch + 1);
}

/// Permission denial rejects even when drift and policy would otherwise
/// allow the transition.
#[tokio::test]
async fn permission_denied_proposal_is_rejected_not_pended() {
    struct DenyAll;
    #[async_trait::async_trait]
    impl governor_core::governance::PermissionClient for DenyAll {
        async fn check(&self, _user: &str, _relation: &str, _object: &str) -> PermissionDecision {
            PermissionDecision {
                allowed: false,
                reason: Some("not a writer".to_string()),
            }
        }
    }

    let wal = Arc::new(MemoryWal::new());
    let state_machine = Arc::new(MemoryStateMachine::new(wal.clone()));
    let scope_state = state_machine.bootstrap("scope-4", Uuid::new_v4()).await.unwrap();

    let bus = Arc::new(MemoryEventBus::new());
    let pending_review = Arc::new(MemoryPendingReviewRegistry::new());
    let pipeline = GovernancePipeline::new(
        bus,
        wal.clone(),
        state_machine.clone(),
        Arc::new(StaticDriftProvider(DriftSnapshot {
            level: DriftLevel::None,
            types: vec![],
        })),
        Arc::new(StaticPolicy(PolicyConfig {
            mode: Mode::Yolo,
            transition_rules: vec![],
            rules: vec![],
            scopes: Default::default(),
        })),
        Arc::new(DenyAll),
        Arc::new(NoOversight),
        pending_review.clone(),
        Arc::new(NullExporter),
    );

    let proposal = Proposal {
        proposal_id: Uuid::new_v4(),
        agent: "drift-worker".to_string(),
        proposed_action: "advance_state".to_string(),
        target_node: "scope-4/ContextIngested".to_string(),
        payload: ProposalPayload {
            expected_epoch: scope_state.epoch,
            from: WorkflowNode::ContextIngested,
            to: WorkflowNode::FactsExtracted,
        },
        mode: Mode::Yolo,
    };
    pipeline.process(&proposal).await.unwrap();

    assert!(!pending_review.is_pending("scope-4").await.unwrap());
    let tail = wal.tail(10).await.unwrap();
    assert!(tail.iter().any(|e| e.data.event_type == "proposal_rejected"));
}
