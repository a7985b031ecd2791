//! In-memory [`RecordStore`] implementation.
//!
//! Doubles as the seedable catalog for integration tests: construct with
//! [`InMemoryRecordStore::new`] and call the `seed_*` methods to populate
//! applications, API keys, models, features, policy rules, and budgets
//! before exercising the pipeline.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use warden_audit::{AuditError, RecordStore};
use warden_core::{
    ApiKeyRecord, AppId, Application, AuditEntry, Budget, BudgetPeriod, BudgetScope, Environment,
    EnvironmentConfig, FeatureDescriptor, FeatureId, ModelDescriptor, ModelId, PolicyRule, Trace,
    UsageRecord,
};

#[derive(Default)]
pub struct InMemoryRecordStore {
    traces: Mutex<Vec<Trace>>,
    usage: Mutex<Vec<UsageRecord>>,
    audit_entries: Mutex<Vec<AuditEntry>>,
    applications: DashMap<AppId, Application>,
    api_keys_by_hash: DashMap<String, ApiKeyRecord>,
    environments: DashMap<Environment, EnvironmentConfig>,
    models: DashMap<ModelId, ModelDescriptor>,
    model_aliases: DashMap<String, ModelId>,
    features: DashMap<(AppId, FeatureId), FeatureDescriptor>,
    policy_rules: DashMap<String, PolicyRule>,
    budgets: DashMap<(String, Option<Environment>, &'static str), Budget>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_application(&self, app: Application) {
        self.applications.insert(app.app_id.clone(), app);
    }

    pub fn seed_api_key(&self, key: ApiKeyRecord) {
        self.api_keys_by_hash.insert(key.key_hash.clone(), key);
    }

    pub fn seed_environment(&self, config: EnvironmentConfig) {
        self.environments.insert(config.environment, config);
    }

    pub fn seed_model(&self, model: ModelDescriptor) {
        for alias in &model.aliases {
            self.model_aliases.insert(alias.clone(), model.model_id.clone());
        }
        self.models.insert(model.model_id.clone(), model);
    }

    pub fn seed_feature(&self, feature: FeatureDescriptor) {
        self.features
            .insert((feature.app_id.clone(), feature.feature_id.clone()), feature);
    }

    pub fn seed_policy_rule(&self, rule: PolicyRule) {
        self.policy_rules.insert(rule.id.clone(), rule);
    }

    pub fn seed_budget(&self, budget: Budget) {
        self.budgets.insert(
            (
                budget.scope.key_component(),
                budget.environment,
                budget.period.label(),
            ),
            budget,
        );
    }

    #[must_use]
    pub fn traces(&self) -> Vec<Trace> {
        self.traces.lock().expect("trace store mutex poisoned").clone()
    }

    #[must_use]
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.lock().expect("usage store mutex poisoned").clone()
    }

    #[must_use]
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit_entries
            .lock()
            .expect("audit store mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn write_trace(&self, trace: &Trace) -> Result<(), AuditError> {
        self.traces
            .lock()
            .expect("trace store mutex poisoned")
            .push(trace.clone());
        Ok(())
    }

    async fn write_usage(&self, usage: &UsageRecord) -> Result<(), AuditError> {
        self.usage
            .lock()
            .expect("usage store mutex poisoned")
            .push(usage.clone());
        Ok(())
    }

    async fn write_audit_entry(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.audit_entries
            .lock()
            .expect("audit store mutex poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn get_application(&self, app_id: &AppId) -> Result<Option<Application>, AuditError> {
        Ok(self.applications.get(app_id).map(|e| e.clone()))
    }

    async fn get_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<ApiKeyRecord>, AuditError> {
        Ok(self.api_keys_by_hash.get(key_hash).map(|e| e.clone()))
    }

    async fn get_environment_config(
        &self,
        environment: Environment,
    ) -> Result<Option<EnvironmentConfig>, AuditError> {
        Ok(self.environments.get(&environment).map(|e| e.clone()))
    }

    async fn get_model(&self, model_id: &ModelId) -> Result<Option<ModelDescriptor>, AuditError> {
        if let Some(model) = self.models.get(model_id) {
            return Ok(Some(model.clone()));
        }
        if let Some(real_id) = self.model_aliases.get(model_id.as_str()) {
            return Ok(self.models.get(&*real_id).map(|e| e.clone()));
        }
        Ok(None)
    }

    async fn get_feature(
        &self,
        app_id: &AppId,
        feature_id: &FeatureId,
    ) -> Result<Option<FeatureDescriptor>, AuditError> {
        Ok(self
            .features
            .get(&(app_id.clone(), feature_id.clone()))
            .map(|e| e.clone()))
    }

    async fn list_policy_rules(&self, app_id: &AppId) -> Result<Vec<PolicyRule>, AuditError> {
        Ok(self
            .policy_rules
            .iter()
            .map(|e| e.clone())
            .filter(|rule| rule.applies_to(app_id))
            .collect())
    }

    async fn get_budget(
        &self,
        scope: &BudgetScope,
        environment: Option<Environment>,
        period: BudgetPeriod,
    ) -> Result<Option<Budget>, AuditError> {
        Ok(self
            .budgets
            .get(&(scope.key_component(), environment, period.label()))
            .map(|e| e.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{ModelLimits, ModelPricing, ModelStatus, ProviderKind};

    #[tokio::test]
    async fn model_alias_resolves_to_real_descriptor() {
        let store = InMemoryRecordStore::new();
        store.seed_model(ModelDescriptor {
            model_id: ModelId::from("gpt-4-turbo"),
            provider: ProviderKind::OpenAiCompatible,
            provider_model_id: "gpt-4-turbo".into(),
            pricing: ModelPricing::default(),
            limits: ModelLimits::default(),
            capabilities: vec![],
            status: ModelStatus::Available,
            base_url: None,
            aliases: vec!["gpt-4".into()],
        });
        let resolved = store.get_model(&ModelId::from("gpt-4")).await.unwrap();
        assert_eq!(resolved.unwrap().model_id, ModelId::from("gpt-4-turbo"));
    }

    #[tokio::test]
    async fn write_trace_is_retrievable() {
        let store = InMemoryRecordStore::new();
        let trace = Trace::start(
            warden_core::RequestId::from("r1"),
            AppId::from("acme"),
            FeatureId::from("chat"),
            chrono::Utc::now(),
        );
        store.write_trace(&trace).await.unwrap();
        assert_eq!(store.traces().len(), 1);
    }
}
