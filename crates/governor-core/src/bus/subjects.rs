//! Stable bus subject names. Kept as plain functions rather than an enum
//! since several are parameterized by a caller-supplied suffix and the bus
//! only ever deals in strings.

pub const JOBS_EXTRACT_FACTS: &str = "swarm.jobs.extract_facts";
pub const JOBS_CHECK_DRIFT: &str = "swarm.jobs.check_drift";
pub const JOBS_PLAN_ACTIONS: &str = "swarm.jobs.plan_actions";
pub const JOBS_SUMMARIZE_STATUS: &str = "swarm.jobs.summarize_status";

pub const PROPOSALS_ALL: &str = "swarm.proposals.>";

pub const ACTIONS_ADVANCE_STATE: &str = "swarm.actions.advance_state";
pub const ACTIONS_FINALITY: &str = "swarm.actions.finality";

pub const FINALITY_EVALUATE: &str = "swarm.finality.evaluate";

pub fn proposal(agent: &str) -> String {
    format!("swarm.proposals.{agent}")
}

pub fn rejection(proposed_action: &str) -> String {
    format!("swarm.rejections.{proposed_action}")
}

pub fn pending_approval(proposal_id: &uuid::Uuid) -> String {
    format!("swarm.pending_approval.{proposal_id}")
}

pub fn event(event_type: &str) -> String {
    format!("swarm.events.{event_type}")
}
