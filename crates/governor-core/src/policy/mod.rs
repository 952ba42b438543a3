//! Policy config: YAML-defined transition rules, per-scope mode
//! overrides, and drift/action mappings.

use crate::error::PolicyError;
use crate::types::{DriftLevel, DriftSnapshot, Mode, WorkflowNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockWhen {
    pub drift_level: Vec<DriftLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: WorkflowNode,
    pub to: WorkflowNode,
    pub block_when: BlockWhen,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleWhen {
    pub drift_level: Vec<DriftLevel>,
    #[serde(default)]
    pub drift_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub when: RuleWhen,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeOverride {
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub mode: Mode,
    #[serde(default)]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub scopes: HashMap<String, ScopeOverride>,
}

impl PolicyConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, PolicyError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path).map_err(|e| PolicyError::Read {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }
}

#[derive(Debug, Clone)]
pub struct TransitionDecision {
    pub allowed: bool,
    pub reason: String,
}

/// First `transition_rules` entry matching `(from, to)` whose
/// `block_when.drift_level` includes `drift.level` blocks the transition;
/// no match allows it.
pub fn can_transition(
    from: WorkflowNode,
    to: WorkflowNode,
    drift: &DriftSnapshot,
    config: &PolicyConfig,
) -> TransitionDecision {
    for rule in &config.transition_rules {
        if rule.from == from && rule.to == to && rule.block_when.drift_level.contains(&drift.level) {
            return TransitionDecision {
                allowed: false,
                reason: rule.reason.clone(),
            };
        }
    }
    TransitionDecision {
        allowed: true,
        reason: String::new(),
    }
}

/// Collects every rule action whose `when` matches the current drift
/// snapshot: `drift_level` must contain `drift.level`, and when
/// `drift_type` is set it must appear in `drift.types`.
pub fn evaluate_rules(drift: &DriftSnapshot, config: &PolicyConfig) -> Vec<String> {
    config
        .rules
        .iter()
        .filter(|rule| {
            rule.when.drift_level.contains(&drift.level)
                && rule
                    .when
                    .drift_type
                    .as_ref()
                    .map(|t| drift.types.iter().any(|dt| dt == t))
                    .unwrap_or(true)
        })
        .map(|rule| rule.action.clone())
        .collect()
}

/// Returns `config` with `mode` overridden by `scopes[scope_id].mode` when
/// present.
pub fn get_for_scope(scope_id: &str, config: &PolicyConfig) -> PolicyConfig {
    let mut scoped = config.clone();
    if let Some(ov) = config.scopes.get(scope_id) {
        scoped.mode = ov.mode;
    }
    scoped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DriftLevel;

    fn drift(level: DriftLevel, types: &[&str]) -> DriftSnapshot {
        DriftSnapshot {
            level,
            types: types.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn base_config() -> PolicyConfig {
        PolicyConfig {
            mode: Mode::Yolo,
            transition_rules: vec![TransitionRule {
                from: WorkflowNode::DriftChecked,
                to: WorkflowNode::ContextIngested,
                block_when: BlockWhen {
                    drift_level: vec![DriftLevel::Critical, DriftLevel::High],
                },
                reason: "drift too severe to restart context ingestion".to_string(),
            }],
            rules: vec![Rule {
                when: RuleWhen {
                    drift_level: vec![DriftLevel::Medium, DriftLevel::High],
                    drift_type: Some("schema_change".to_string()),
                },
                action: "notify_owner".to_string(),
            }],
            scopes: HashMap::new(),
        }
    }

    #[test]
    fn blocks_critical_drift_on_matching_transition() {
        let config = base_config();
        let decision = can_transition(
            WorkflowNode::DriftChecked,
            WorkflowNode::ContextIngested,
            &drift(DriftLevel::Critical, &[]),
            &config,
        );
        assert!(!decision.allowed);
        assert!(decision.reason.contains("severe"));
    }

    #[test]
    fn allows_low_drift_on_matching_transition() {
        let config = base_config();
        let decision = can_transition(
            WorkflowNode::DriftChecked,
            WorkflowNode::ContextIngested,
            &drift(DriftLevel::Low, &[]),
            &config,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn allows_unrelated_transition_regardless_of_drift() {
        let config = base_config();
        let decision = can_transition(
            WorkflowNode::ContextIngested,
            WorkflowNode::FactsExtracted,
            &drift(DriftLevel::Critical, &[]),
            &config,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn evaluate_rules_matches_on_level_and_type() {
        let config = base_config();
        let actions = evaluate_rules(&drift(DriftLevel::High, &["schema_change"]), &config);
        assert_eq!(actions, vec!["notify_owner".to_string()]);

        let none = evaluate_rules(&drift(DriftLevel::High, &["wording"]), &config);
        assert!(none.is_empty());
    }

    #[test]
    fn get_for_scope_overrides_mode() {
        let mut config = base_config();
        config.scopes.insert(
            "scope-a".to_string(),
            ScopeOverride { mode: Mode::Mitl },
        );
        let scoped = get_for_scope("scope-a", &config);
        assert_eq!(scoped.mode, Mode::Mitl);
        let unscoped = get_for_scope("scope-b", &config);
        assert_eq!(unscoped.mode, Mode::Yolo);
    }
}
