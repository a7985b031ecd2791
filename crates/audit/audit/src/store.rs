use async_trait::async_trait;
use warden_core::{
    ApiKeyRecord, AppId, Application, AuditEntry, Budget, BudgetPeriod, BudgetScope, Environment,
    EnvironmentConfig, FeatureDescriptor, FeatureId, ModelDescriptor, ModelId, Trace, UsageRecord,
};

use crate::error::AuditError;

/// The Record Store Port (§2, §6): durable persistence for traces, audit
/// entries, and budget ledgers, plus the read-side of the RDBMS catalog
/// tables (`applications`, `api_keys`, `policy_rules`, `budgets`, `features`,
/// `model_registry`) that the admission pipeline consults. Administrative
/// CRUD against these tables is an external collaborator (§1) — this port
/// only exposes the reads and appends the core pipeline performs.
///
/// Implementations must be `Send + Sync` for use across concurrent request
/// tasks. Writes on this trait back non-critical paths (audit entries,
/// usage records); callers must not let a failure here delay a response —
/// see §7's propagation policy.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Durably materialize a finalized trace. Called exactly once per
    /// request, after `Trace::ended_at` is set.
    async fn write_trace(&self, trace: &Trace) -> Result<(), AuditError>;

    /// Append a billing artifact for one completed, non-dry-run request.
    async fn write_usage(&self, usage: &UsageRecord) -> Result<(), AuditError>;

    /// Append a structured audit event. Append-only: callers never update
    /// or delete an existing entry.
    async fn write_audit_entry(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Look up an application by its stable identifier.
    async fn get_application(&self, app_id: &AppId) -> Result<Option<Application>, AuditError>;

    /// Look up the API key record whose salted hash matches `key_hash`.
    async fn get_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<ApiKeyRecord>, AuditError>;

    /// Look up the runtime configuration for one environment.
    async fn get_environment_config(
        &self,
        environment: Environment,
    ) -> Result<Option<EnvironmentConfig>, AuditError>;

    /// Resolve a model id (or alias) to its catalog entry.
    async fn get_model(&self, model_id: &ModelId) -> Result<Option<ModelDescriptor>, AuditError>;

    /// Look up one application's feature descriptor.
    async fn get_feature(
        &self,
        app_id: &AppId,
        feature_id: &FeatureId,
    ) -> Result<Option<FeatureDescriptor>, AuditError>;

    /// Load every policy rule that applies to `app_id`: the global rule set
    /// plus any rules scoped to this app. Unordered; the Policy Engine
    /// sorts by `(priority, created_at)` itself.
    async fn list_policy_rules(&self, app_id: &AppId) -> Result<Vec<warden_core::PolicyRule>, AuditError>;

    /// Authoritative budget row for one scope/environment/period, carrying
    /// the soft/hard limits the KV counter is checked against. The KV store
    /// holds the live counter; this is the limits-of-record.
    async fn get_budget(
        &self,
        scope: &BudgetScope,
        environment: Option<Environment>,
        period: BudgetPeriod,
    ) -> Result<Option<Budget>, AuditError>;
}
