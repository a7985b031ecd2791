/// Schema for the RDBMS tables listed in §6. Request traces and audit logs
/// are append-only; everything else is the external admin surface's
/// read-mostly catalog, which this crate only ever selects from.
pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        org_id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id TEXT PRIMARY KEY,
        org_id TEXT REFERENCES organizations(org_id),
        email TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS applications (
        app_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        team TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        allowed_providers JSONB,
        allowed_models JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        key_hash TEXT PRIMARY KEY,
        key_prefix TEXT NOT NULL,
        app_id TEXT NOT NULL REFERENCES applications(app_id),
        environment TEXT NOT NULL,
        encrypted_upstream_key TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        expires_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS environment_configs (
        environment TEXT PRIMARY KEY,
        strict_mode BOOLEAN NOT NULL,
        honor_debug_headers BOOLEAN NOT NULL,
        security_scan_level TEXT NOT NULL,
        budget_multiplier DOUBLE PRECISION NOT NULL,
        allowed_models JSONB,
        blocked_models JSONB NOT NULL DEFAULT '[]',
        log_prompts BOOLEAN NOT NULL,
        log_responses BOOLEAN NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS model_registry (
        model_id TEXT PRIMARY KEY,
        provider TEXT NOT NULL,
        provider_model_id TEXT NOT NULL,
        pricing JSONB NOT NULL,
        limits JSONB NOT NULL,
        capabilities JSONB NOT NULL DEFAULT '[]',
        status TEXT NOT NULL,
        base_url TEXT,
        aliases JSONB NOT NULL DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS features (
        app_id TEXT NOT NULL REFERENCES applications(app_id),
        feature_id TEXT NOT NULL,
        allowed_actions JSONB NOT NULL,
        allowed_models JSONB NOT NULL,
        allowed_environments JSONB NOT NULL,
        max_tokens_per_request INTEGER NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        PRIMARY KEY (app_id, feature_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS policy_rules (
        id TEXT PRIMARY KEY,
        priority INTEGER NOT NULL,
        action TEXT NOT NULL,
        conditions JSONB NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL,
        app_scope TEXT,
        reason TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS budgets (
        scope_key TEXT NOT NULL,
        scope JSONB NOT NULL,
        environment TEXT,
        period TEXT NOT NULL,
        soft_limit_usd DOUBLE PRECISION NOT NULL,
        hard_limit_usd DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (scope_key, environment, period)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS request_traces (
        trace_id TEXT PRIMARY KEY,
        app_id TEXT NOT NULL,
        feature_id TEXT NOT NULL,
        model_id TEXT,
        started_at TIMESTAMPTZ NOT NULL,
        ended_at TIMESTAMPTZ,
        decision TEXT,
        status TEXT,
        outcome_detail TEXT,
        body JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS usage_records (
        id BIGSERIAL PRIMARY KEY,
        request_id TEXT NOT NULL,
        app_id TEXT NOT NULL,
        feature_id TEXT NOT NULL,
        model_id TEXT NOT NULL,
        input_tokens BIGINT NOT NULL,
        output_tokens BIGINT NOT NULL,
        cost_usd DOUBLE PRECISION NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id TEXT PRIMARY KEY,
        request_id TEXT NOT NULL,
        app_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        detail JSONB NOT NULL
    )
    "#,
];

/// Run every migration in order inside one transaction. Statements use
/// `CREATE TABLE IF NOT EXISTS`, so this is safe to call on every startup.
///
/// # Errors
/// Returns the first `sqlx` error encountered.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await
}
