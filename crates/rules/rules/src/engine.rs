use std::sync::Arc;
use std::time::Duration;

use warden_audit::RecordStore;
use warden_core::{ordering_key, AppId, PolicyDecision, PolicyRule, RequestContext, RuleAction};

use crate::condition::matches;
use crate::error::RulesError;

const CACHE_TTL: Duration = Duration::from_secs(60);

/// Evaluates the Policy Engine's ordered rule list against a request
/// context, backed by a per-app compiled-rule-list cache.
pub struct PolicyEngine {
    store: Arc<dyn RecordStore>,
    cache: moka::future::Cache<AppId, Arc<Vec<PolicyRule>>>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let cache = moka::future::Cache::builder()
            .time_to_live(CACHE_TTL)
            .build();
        Self { store, cache }
    }

    /// Invalidate the cached rule list for one app, e.g. on a `policy:{app}
    /// changed` notification.
    pub async fn invalidate(&self, app_id: &AppId) {
        self.cache.invalidate(app_id).await;
    }

    async fn rules_for(&self, app_id: &AppId) -> Result<Arc<Vec<PolicyRule>>, RulesError> {
        if let Some(cached) = self.cache.get(app_id).await {
            return Ok(cached);
        }
        let mut rules = self.store.list_policy_rules(app_id).await?;
        rules.sort_by_key(ordering_key);
        tracing::debug!(app_id = %app_id, rule_count = rules.len(), "compiled policy rule list");
        let rules = Arc::new(rules);
        self.cache.insert(app_id.clone(), rules.clone()).await;
        Ok(rules)
    }

    /// Evaluate every enabled rule scoped to `ctx.app_id` (global plus
    /// app-scoped) in priority order. A matched `deny` terminates evaluation
    /// immediately; a matched `warn` is recorded but evaluation continues,
    /// since a later `deny` still wins.
    pub async fn evaluate(&self, ctx: &RequestContext) -> Result<PolicyDecision, RulesError> {
        let rules = self.rules_for(&ctx.app_id).await?;
        let mut decision = PolicyDecision::default();

        for rule in rules.iter() {
            if !rule.conditions.iter().all(|c| matches(c, ctx)) {
                continue;
            }
            decision.matched_rules.push(rule.id.clone());
            decision.reasons.push(
                rule.reason
                    .clone()
                    .unwrap_or_else(|| format!("rule {} matched", rule.id)),
            );
            match rule.action {
                RuleAction::Deny => {
                    decision.verdict = Some(RuleAction::Deny);
                    return Ok(decision);
                }
                RuleAction::Warn => {
                    if decision.verdict != Some(RuleAction::Deny) {
                        decision.verdict = Some(RuleAction::Warn);
                    }
                }
                RuleAction::Allow => {
                    if decision.verdict.is_none() {
                        decision.verdict = Some(RuleAction::Allow);
                    }
                }
            }
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use warden_audit_memory::InMemoryRecordStore;
    use warden_core::{Condition, Environment, FeatureId, Identity, RequestId};

    use super::*;

    fn ctx(app_id: &str, model_id: Option<&str>) -> RequestContext {
        let identity = Identity {
            app_id: AppId::from(app_id),
            environment: Environment::Production,
            upstream_key: secrecy::SecretString::from("sk-test".to_owned()),
            allowed_providers: None,
            allowed_models: None,
        };
        let mut request_ctx = RequestContext::new(
            RequestId::from("r1"),
            &identity,
            FeatureId::from("chat"),
            Utc::now(),
        );
        request_ctx.model_id = model_id.map(warden_core::ModelId::from);
        request_ctx
    }

    fn rule(id: &str, priority: i32, action: RuleAction, conditions: Vec<Condition>) -> PolicyRule {
        PolicyRule {
            id: id.into(),
            priority,
            action,
            conditions,
            enabled: true,
            created_at: Utc::now(),
            app_scope: None,
            reason: Some(format!("{id} fired")),
        }
    }

    #[tokio::test]
    async fn no_matching_rules_defaults_to_allow() {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = PolicyEngine::new(store);
        let decision = engine.evaluate(&ctx("acme", None)).await.unwrap();
        assert_eq!(decision.verdict_or_allow(), RuleAction::Allow);
        assert!(decision.matched_rules.is_empty());
    }

    #[tokio::test]
    async fn deny_wins_over_earlier_warn() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.seed_policy_rule(rule(
            "warn-rule",
            1,
            RuleAction::Warn,
            vec![Condition::Equals {
                field: "environment".into(),
                value: "production".into(),
            }],
        ));
        store.seed_policy_rule(rule(
            "deny-rule",
            2,
            RuleAction::Deny,
            vec![Condition::Glob {
                field: "model_id".into(),
                pattern: "gpt-4*".into(),
            }],
        ));
        let engine = PolicyEngine::new(store);
        let decision = engine.evaluate(&ctx("acme", Some("gpt-4-turbo"))).await.unwrap();
        assert_eq!(decision.verdict_or_allow(), RuleAction::Deny);
        assert_eq!(decision.matched_rules, vec!["warn-rule", "deny-rule"]);
    }

    #[tokio::test]
    async fn glob_mismatch_does_not_match() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.seed_policy_rule(rule(
            "deny-rule",
            1,
            RuleAction::Deny,
            vec![Condition::Glob {
                field: "model_id".into(),
                pattern: "claude-*".into(),
            }],
        ));
        let engine = PolicyEngine::new(store);
        let decision = engine.evaluate(&ctx("acme", Some("gpt-4-turbo"))).await.unwrap();
        assert_eq!(decision.verdict_or_allow(), RuleAction::Allow);
    }

    #[tokio::test]
    async fn rule_list_is_cached_across_calls() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.seed_policy_rule(rule(
            "deny-rule",
            1,
            RuleAction::Deny,
            vec![Condition::Equals {
                field: "app_id".into(),
                value: "acme".into(),
            }],
        ));
        let engine = PolicyEngine::new(store.clone());
        let first = engine.evaluate(&ctx("acme", None)).await.unwrap();
        assert_eq!(first.verdict_or_allow(), RuleAction::Deny);

        store.seed_policy_rule(rule(
            "deny-rule",
            1,
            RuleAction::Allow,
            vec![Condition::Equals {
                field: "app_id".into(),
                value: "acme".into(),
            }],
        ));
        let second = engine.evaluate(&ctx("acme", None)).await.unwrap();
        assert_eq!(second.verdict_or_allow(), RuleAction::Deny, "stale cache entry should still be served");

        engine.invalidate(&AppId::from("acme")).await;
        let third = engine.evaluate(&ctx("acme", None)).await.unwrap();
        assert_eq!(third.verdict_or_allow(), RuleAction::Allow);
    }
}
