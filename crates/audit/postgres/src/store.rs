use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use warden_audit::{AuditError, RecordStore};
use warden_core::{
    ApiKeyRecord, AppId, Application, AuditEntry, Budget, BudgetPeriod, BudgetScope, Condition,
    Environment, EnvironmentConfig, FeatureDescriptor, FeatureId, ModelDescriptor, ModelId,
    PolicyRule, RuleAction, SecurityScanLevel, Trace, UsageRecord,
};

use crate::config::PostgresAuditConfig;

fn backend_err(e: sqlx::Error) -> AuditError {
    AuditError::Backend(e.to_string())
}

/// `RecordStore` backed by PostgreSQL: the authoritative RDBMS referenced
/// throughout §3 and §6. Connection pooling is handled by `sqlx`'s own pool;
/// no additional pooling layer is introduced.
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Connect using `config` and run pending migrations.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established or a
    /// migration fails.
    pub async fn connect(config: &PostgresAuditConfig) -> Result<Self, AuditError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.url)
            .await
            .map_err(backend_err)?;
        crate::migrations::run_migrations(&pool)
            .await
            .map_err(backend_err)?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn write_trace(&self, trace: &Trace) -> Result<(), AuditError> {
        let body = serde_json::to_value(trace).map_err(|e| AuditError::Backend(e.to_string()))?;
        sqlx::query(
            r"INSERT INTO request_traces
                (trace_id, app_id, feature_id, model_id, started_at, ended_at, decision, status, outcome_detail, body)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
              ON CONFLICT (trace_id) DO UPDATE SET
                ended_at = EXCLUDED.ended_at, decision = EXCLUDED.decision,
                status = EXCLUDED.status, outcome_detail = EXCLUDED.outcome_detail, body = EXCLUDED.body",
        )
        .bind(trace.trace_id.as_str())
        .bind(trace.app_id.as_str())
        .bind(trace.feature_id.as_str())
        .bind(trace.model_id.as_ref().map(warden_core::ModelId::as_str))
        .bind(trace.started_at)
        .bind(trace.ended_at)
        .bind(trace.decision.map(|d| format!("{d:?}")))
        .bind(trace.status.map(|s| format!("{s:?}")))
        .bind(trace.outcome_detail.as_deref())
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn write_usage(&self, usage: &UsageRecord) -> Result<(), AuditError> {
        sqlx::query(
            r"INSERT INTO usage_records
                (request_id, app_id, feature_id, model_id, input_tokens, output_tokens, cost_usd, recorded_at)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(usage.request_id.as_str())
        .bind(usage.app_id.as_str())
        .bind(usage.feature_id.as_str())
        .bind(usage.model_id.as_str())
        .bind(usage.input_tokens as i64)
        .bind(usage.output_tokens as i64)
        .bind(usage.cost_usd)
        .bind(usage.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn write_audit_entry(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            r"INSERT INTO audit_logs (id, request_id, app_id, event_type, recorded_at, detail)
              VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&entry.id)
        .bind(entry.request_id.as_str())
        .bind(entry.app_id.as_str())
        .bind(&entry.event_type)
        .bind(entry.recorded_at)
        .bind(&entry.detail)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_application(&self, app_id: &AppId) -> Result<Option<Application>, AuditError> {
        let row = sqlx::query_as::<_, (String, String, String, bool, Option<serde_json::Value>, Option<serde_json::Value>)>(
            "SELECT app_id, name, team, active, allowed_providers, allowed_models FROM applications WHERE app_id = $1",
        )
        .bind(app_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(row.map(|(app_id, name, team, active, providers, models)| Application {
            app_id: AppId::from(app_id),
            name,
            team,
            active,
            allowed_providers: providers.and_then(|v| serde_json::from_value(v).ok()),
            allowed_models: models.and_then(|v| serde_json::from_value(v).ok()),
        }))
    }

    async fn get_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<ApiKeyRecord>, AuditError> {
        let row = sqlx::query_as::<_, (String, String, String, String, String, bool, Option<chrono::DateTime<chrono::Utc>>)>(
            r"SELECT key_hash, key_prefix, app_id, environment, encrypted_upstream_key, active, expires_at
              FROM api_keys WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(row.and_then(|(key_hash, key_prefix, app_id, env, enc_key, active, expires_at)| {
            Some(ApiKeyRecord {
                key_hash,
                key_prefix,
                app_id: AppId::from(app_id),
                environment: parse_environment(&env)?,
                encrypted_upstream_key: enc_key,
                active,
                expires_at,
            })
        }))
    }

    async fn get_environment_config(
        &self,
        environment: Environment,
    ) -> Result<Option<EnvironmentConfig>, AuditError> {
        let row = sqlx::query_as::<_, (bool, bool, String, f64, Option<serde_json::Value>, serde_json::Value, bool, bool)>(
            r"SELECT strict_mode, honor_debug_headers, security_scan_level, budget_multiplier,
                     allowed_models, blocked_models, log_prompts, log_responses
              FROM environment_configs WHERE environment = $1",
        )
        .bind(environment.label())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(row.map(|(strict, debug, scan, mult, allowed, blocked, log_p, log_r)| EnvironmentConfig {
            environment,
            strict_mode: strict,
            honor_debug_headers: debug,
            security_scan_level: parse_scan_level(&scan),
            budget_multiplier: mult,
            allowed_models: allowed.and_then(|v| serde_json::from_value(v).ok()),
            blocked_models: serde_json::from_value(blocked).unwrap_or_default(),
            log_prompts: log_p,
            log_responses: log_r,
        }))
    }

    async fn get_model(&self, model_id: &ModelId) -> Result<Option<ModelDescriptor>, AuditError> {
        let row = sqlx::query_as::<_, (String, String, String, serde_json::Value, serde_json::Value, serde_json::Value, String, Option<String>, serde_json::Value)>(
            r"SELECT model_id, provider, provider_model_id, pricing, limits, capabilities, status, base_url, aliases
              FROM model_registry
              WHERE model_id = $1 OR aliases @> to_jsonb($1::text)",
        )
        .bind(model_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(row.and_then(|(mid, provider, provider_model_id, pricing, limits, caps, status, base_url, aliases)| {
            Some(ModelDescriptor {
                model_id: ModelId::from(mid),
                provider: serde_json::from_value(serde_json::Value::String(provider)).ok()?,
                provider_model_id,
                pricing: serde_json::from_value(pricing).ok()?,
                limits: serde_json::from_value(limits).ok()?,
                capabilities: serde_json::from_value(caps).unwrap_or_default(),
                status: serde_json::from_value(serde_json::Value::String(status)).ok()?,
                base_url,
                aliases: serde_json::from_value(aliases).unwrap_or_default(),
            })
        }))
    }

    async fn get_feature(
        &self,
        app_id: &AppId,
        feature_id: &FeatureId,
    ) -> Result<Option<FeatureDescriptor>, AuditError> {
        let row = sqlx::query_as::<_, (serde_json::Value, serde_json::Value, serde_json::Value, i32, bool)>(
            r"SELECT allowed_actions, allowed_models, allowed_environments, max_tokens_per_request, enabled
              FROM features WHERE app_id = $1 AND feature_id = $2",
        )
        .bind(app_id.as_str())
        .bind(feature_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(row.map(|(actions, models, envs, cap, enabled)| FeatureDescriptor {
            app_id: app_id.clone(),
            feature_id: feature_id.clone(),
            allowed_actions: serde_json::from_value(actions).unwrap_or_default(),
            allowed_models: serde_json::from_value(models).unwrap_or_default(),
            allowed_environments: serde_json::from_value(envs).unwrap_or_default(),
            max_tokens_per_request: cap as u32,
            enabled,
        }))
    }

    async fn list_policy_rules(&self, app_id: &AppId) -> Result<Vec<PolicyRule>, AuditError> {
        let rows = sqlx::query_as::<_, (String, i32, String, serde_json::Value, bool, chrono::DateTime<chrono::Utc>, Option<String>, Option<String>)>(
            r"SELECT id, priority, action, conditions, enabled, created_at, app_scope, reason
              FROM policy_rules WHERE enabled AND (app_scope IS NULL OR app_scope = $1)",
        )
        .bind(app_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, priority, action, conditions, enabled, created_at, scope, reason)| {
                Some(PolicyRule {
                    id,
                    priority,
                    action: parse_rule_action(&action)?,
                    conditions: serde_json::from_value::<Vec<Condition>>(conditions).unwrap_or_default(),
                    enabled,
                    created_at,
                    app_scope: scope.map(AppId::from),
                    reason,
                })
            })
            .collect())
    }

    async fn get_budget(
        &self,
        scope: &BudgetScope,
        environment: Option<Environment>,
        period: BudgetPeriod,
    ) -> Result<Option<Budget>, AuditError> {
        let row = sqlx::query_as::<_, (serde_json::Value, f64, f64)>(
            r"SELECT scope, soft_limit_usd, hard_limit_usd FROM budgets
              WHERE scope_key = $1 AND environment IS NOT DISTINCT FROM $2 AND period = $3",
        )
        .bind(scope.key_component())
        .bind(environment.map(Environment::label))
        .bind(period.label())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(row.and_then(|(scope_json, soft, hard)| {
            Some(Budget {
                scope: serde_json::from_value(scope_json).ok()?,
                environment,
                period,
                soft_limit_usd: soft,
                hard_limit_usd: hard,
            })
        }))
    }
}

fn parse_environment(s: &str) -> Option<Environment> {
    match s {
        "development" => Some(Environment::Development),
        "staging" => Some(Environment::Staging),
        "production" => Some(Environment::Production),
        "sandbox" => Some(Environment::Sandbox),
        _ => None,
    }
}

fn parse_scan_level(s: &str) -> SecurityScanLevel {
    match s {
        "strict" => SecurityScanLevel::Strict,
        "off" => SecurityScanLevel::Off,
        _ => SecurityScanLevel::Standard,
    }
}

fn parse_rule_action(s: &str) -> Option<RuleAction> {
    match s {
        "allow" => Some(RuleAction::Allow),
        "warn" => Some(RuleAction::Warn),
        "deny" => Some(RuleAction::Deny),
        _ => None,
    }
}
