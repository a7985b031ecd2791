//! Wires every collaborator named in §4.11 into one [`PipelineDeps`],
//! choosing backends per [`AppConfig`] and sourcing secret material from
//! the process environment rather than the config file.

use std::sync::Arc;

use secrecy::SecretString;
use warden_audit::RecordStore;
use warden_audit_memory::InMemoryRecordStore;
use warden_crypto::{Keyring, MasterKey, parse_master_key};
use warden_gateway::{
    AbuseDetector, AbuseThresholds, BudgetLedger, CredentialResolver, FeatureRegistry, InputValidator,
    LoadBalancingStrategy, PipelineDeps, ProviderRouter, RequestPipeline, RetryConfig, RouteTable, SecurityPlugin,
    SecurityPluginHost, SystemClock,
};
use warden_provider::adapters::{AnthropicAdapter, BedrockAdapter, OpenAiCompatibleAdapter, VertexAdapter};
use warden_provider::AdapterRegistry;
use warden_rules::PolicyEngine;
use warden_state::KvStore;
use warden_state_memory::MemoryKvStore;

use crate::config::AppConfig;
use crate::error::ServerError;
use crate::route_table::CachedRouteTable;

/// Everything a handler needs: the assembled pipeline plus the static
/// config it was built from (for things like `shutdown_timeout_seconds`
/// that live outside the pipeline). Cheap to clone: every field is an
/// `Arc`, as Axum's `State` extractor requires.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// # Errors
    /// Fails if a configured backend (Redis, Postgres) cannot be reached,
    /// or if required secret environment variables are missing/malformed.
    pub async fn build(config: AppConfig) -> Result<Self, ServerError> {
        let kv = build_kv_store(&config).await?;
        let records = build_record_store(&config).await?;

        let keyring = Arc::new(build_keyring()?);
        let hmac_key = read_secret_env("WARDEN_HMAC_KEY")?;

        let clock = Arc::new(SystemClock);
        let credentials = Arc::new(CredentialResolver::new(records.clone(), keyring, hmac_key));
        let input_validator = Arc::new(InputValidator::default());
        let abuse = Arc::new(AbuseDetector::new(kv.clone(), clock.clone(), AbuseThresholds::default()));
        let features = Arc::new(FeatureRegistry::new(records.clone()));
        let policy = Arc::new(PolicyEngine::new(records.clone()));
        let budget = Arc::new(BudgetLedger::new(kv.clone(), records.clone()));
        let security = Arc::new(build_security_host(&config).await?);

        let strategy = parse_strategy(&config.router.strategy);
        let retry = RetryConfig {
            max_attempts: config.router.max_attempts,
            ..RetryConfig::default()
        };
        let router = Arc::new(ProviderRouter::new(strategy, retry));

        let registry = Arc::new(build_adapter_registry(config.router.mock_only).await);
        let routes: Arc<dyn RouteTable> = Arc::new(CachedRouteTable::new(registry));

        let deps = PipelineDeps {
            clock,
            records,
            credentials,
            input_validator,
            abuse,
            features,
            policy,
            budget,
            security,
            router,
        };

        Ok(Self {
            pipeline: Arc::new(RequestPipeline::new(deps, routes)),
            config: Arc::new(config),
        })
    }
}

async fn build_kv_store(config: &AppConfig) -> Result<Arc<dyn KvStore>, ServerError> {
    match config.state.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryKvStore::new())),
        #[cfg(feature = "redis")]
        "redis" => {
            let url = config
                .state
                .redis_url
                .clone()
                .ok_or_else(|| ServerError::Config("state.backend = \"redis\" requires a redis_url".into()))?;
            let redis_config = warden_state_redis::RedisConfig {
                url,
                prefix: config.state.key_prefix.clone(),
                ..warden_state_redis::RedisConfig::default()
            };
            let store = warden_state_redis::RedisKvStore::connect(&redis_config)
                .map_err(|e| ServerError::Config(e.to_string()))?;
            Ok(Arc::new(store))
        }
        other => Err(ServerError::Config(format!("unknown state.backend: {other}"))),
    }
}

async fn build_record_store(config: &AppConfig) -> Result<Arc<dyn RecordStore>, ServerError> {
    match config.audit.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryRecordStore::new())),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config
                .audit
                .postgres_url
                .clone()
                .ok_or_else(|| ServerError::Config("audit.backend = \"postgres\" requires a postgres_url".into()))?;
            let pg_config = warden_audit_postgres::PostgresAuditConfig::new(url);
            let store = warden_audit_postgres::PostgresRecordStore::connect(&pg_config)
                .await
                .map_err(|e| ServerError::Config(e.to_string()))?;
            Ok(Arc::new(store))
        }
        other => Err(ServerError::Config(format!("unknown audit.backend: {other}"))),
    }
}

/// Reads `WARDEN_MASTER_KEY` (64-hex or base64-encoded 32 bytes) and builds
/// the active keyring entry. Retired keys for decrypt-only rotation are not
/// yet exposed through configuration; see `DESIGN.md`.
fn build_keyring() -> Result<Keyring, ServerError> {
    let raw = std::env::var("WARDEN_MASTER_KEY")
        .map_err(|_| ServerError::Config("WARDEN_MASTER_KEY is required".into()))?;
    let key: MasterKey = parse_master_key(&raw).map_err(|e| ServerError::Config(e.to_string()))?;
    Ok(Keyring::new("k1", key))
}

fn read_secret_env(name: &str) -> Result<Vec<u8>, ServerError> {
    std::env::var(name)
        .map(String::into_bytes)
        .map_err(|_| ServerError::Config(format!("{name} is required")))
}

async fn build_security_host(config: &AppConfig) -> Result<SecurityPluginHost, ServerError> {
    let mut plugins: Vec<Arc<dyn SecurityPlugin>> = Vec::new();
    if config.security.pii_enabled {
        plugins.push(Arc::new(warden_gateway::security::PiiPlugin));
    }
    if config.security.secrets_enabled {
        plugins.push(Arc::new(warden_gateway::security::SecretsPlugin));
    }
    if config.security.prompt_injection_enabled {
        plugins.push(Arc::new(warden_gateway::security::PromptInjectionPlugin));
    }
    if config.security.code_injection_enabled {
        plugins.push(Arc::new(warden_gateway::security::CodeInjectionPlugin));
    }
    if let Some(model) = &config.security.moderation_model {
        let credential = std::env::var("WARDEN_MODERATION_API_KEY")
            .map_err(|_| ServerError::Config("security.moderation_model requires WARDEN_MODERATION_API_KEY".into()))?;
        let adapter = Arc::new(OpenAiCompatibleAdapter::new(reqwest::Client::new()));
        let _ = model;
        plugins.push(Arc::new(warden_gateway::security::ModelModerationPlugin::new(
            adapter,
            SecretString::from(credential),
        )));
    }
    Ok(SecurityPluginHost::new(plugins))
}

/// The standard adapter registry (§4.9's selection order), wiring every
/// built-in provider adapter. Bedrock and Vertex authenticate with ambient
/// cloud credentials (`aws-config`, Google application-default credentials)
/// rather than a gateway-issued upstream key.
async fn build_adapter_registry(mock_only: bool) -> AdapterRegistry {
    let http = reqwest::Client::new();
    let openai_compatible = Arc::new(OpenAiCompatibleAdapter::new(http.clone()));
    let anthropic = Arc::new(AnthropicAdapter::new(http.clone()));
    let bedrock = Arc::new(BedrockAdapter::from_ambient_env().await);
    let vertex_project = std::env::var("WARDEN_VERTEX_PROJECT_ID").unwrap_or_default();
    let vertex_location = std::env::var("WARDEN_VERTEX_LOCATION").unwrap_or_else(|_| "us-central1".to_owned());
    let vertex = Arc::new(VertexAdapter::new(http, vertex_project, vertex_location));
    AdapterRegistry::standard(mock_only, openai_compatible, anthropic, bedrock, vertex)
}

fn parse_strategy(raw: &str) -> LoadBalancingStrategy {
    match raw {
        "weighted_random" => LoadBalancingStrategy::WeightedRandom,
        "least_latency" => LoadBalancingStrategy::LeastLatency,
        "random" => LoadBalancingStrategy::Random,
        _ => LoadBalancingStrategy::RoundRobin,
    }
}
