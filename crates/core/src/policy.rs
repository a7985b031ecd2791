use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AppId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Warn,
    Deny,
}

/// A single matchable condition. A rule fires only when every condition
/// in its list matches (logical AND); there is no nested boolean algebra.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Case-insensitive string equality against a named context field.
    Equals { field: String, value: String },
    /// Shell-style glob (`gpt-4*`) against a named context field.
    Glob { field: String, pattern: String },
    /// Numeric field must be less than or equal to the bound.
    NumericLte { field: String, bound: f64 },
    /// Numeric field must fall within `[low, high]` inclusive.
    Interval { field: String, low: f64, high: f64 },
}

/// A rule in the Policy Engine's ordered evaluation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub priority: i32,
    pub action: RuleAction,
    pub conditions: Vec<Condition>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    /// When set, the rule only applies to this application; `None` means global.
    #[serde(default)]
    pub app_scope: Option<AppId>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PolicyRule {
    #[must_use]
    pub fn applies_to(&self, app_id: &AppId) -> bool {
        self.enabled
            && self
                .app_scope
                .as_ref()
                .is_none_or(|scope| scope == app_id)
    }
}

/// Sort order required by the Policy Engine: priority ascending, then
/// creation time ascending, so evaluation is deterministic and stable.
#[must_use]
pub fn ordering_key(rule: &PolicyRule) -> (i32, DateTime<Utc>) {
    (rule.priority, rule.created_at)
}

/// Outcome of a full Policy Engine evaluation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub verdict: Option<RuleAction>,
    pub matched_rules: Vec<String>,
    pub reasons: Vec<String>,
}

impl PolicyDecision {
    #[must_use]
    pub fn verdict_or_allow(&self) -> RuleAction {
        self.verdict.unwrap_or(RuleAction::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, priority: i32, action: RuleAction) -> PolicyRule {
        PolicyRule {
            id: id.into(),
            priority,
            action,
            conditions: vec![],
            enabled: true,
            created_at: Utc::now(),
            app_scope: None,
            reason: None,
        }
    }

    #[test]
    fn ordering_sorts_by_priority_then_created_at() {
        let mut rules = vec![
            rule("b", 5, RuleAction::Deny),
            rule("a", 1, RuleAction::Allow),
            rule("c", 5, RuleAction::Warn),
        ];
        rules.sort_by_key(ordering_key);
        assert_eq!(rules[0].id, "a");
    }

    #[test]
    fn applies_to_respects_app_scope() {
        let mut r = rule("scoped", 1, RuleAction::Deny);
        r.app_scope = Some(AppId::from("acme"));
        assert!(r.applies_to(&AppId::from("acme")));
        assert!(!r.applies_to(&AppId::from("other")));
    }

    #[test]
    fn decision_defaults_to_allow() {
        let decision = PolicyDecision::default();
        assert_eq!(decision.verdict_or_allow(), RuleAction::Allow);
    }
}
