//! Process configuration: TOML file plus a handful of environment
//! variables for secrets that should never land in a config file on disk.

use std::path::Path;

use serde::Deserialize;

/// Top-level process configuration, loaded from a TOML file and overlaid
/// with environment variables for secret material.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

impl AppConfig {
    /// Load from `path`, falling back to defaults for every field the file
    /// omits. Returns an error only if the file exists but fails to parse.
    pub fn load(path: &Path) -> Result<Self, crate::error::ServerError> {
        if !path.exists() {
            return Ok(Self::default_with_env());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| crate::error::ServerError::Config(e.to_string()))?;
        let mut config: Self = toml::from_str(&raw).map_err(|e| crate::error::ServerError::Config(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn default_with_env() -> Self {
        let mut config = Self {
            server: ServerConfig::default(),
            telemetry: TelemetryConfig::default(),
            state: StateConfig::default(),
            audit: AuditConfig::default(),
            security: SecurityConfig::default(),
            router: RouterConfig::default(),
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("WARDEN_REDIS_URL") {
            self.state.redis_url = Some(url);
        }
        if let Ok(url) = std::env::var("WARDEN_POSTGRES_URL") {
            self.audit.postgres_url = Some(url);
        }
        if std::env::var("WARDEN_MOCK_PROVIDERS").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
            self.router.mock_only = true;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_with_env()
    }
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Graceful shutdown timeout in seconds, applied to in-flight requests
    /// and pending audit writes before the listener forcibly exits.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// OpenTelemetry tracing configuration.
#[derive(Debug, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    #[serde(default = "default_otel_sample_ratio")]
    pub sample_ratio: f64,
    #[serde(default = "default_otel_protocol")]
    pub protocol: String,
    #[serde(default = "default_otel_timeout")]
    pub timeout_seconds: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sample_ratio: default_otel_sample_ratio(),
            protocol: default_otel_protocol(),
            timeout_seconds: default_otel_timeout(),
        }
    }
}

fn default_otel_timeout() -> u64 {
    10
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_owned()
}

fn default_otel_service_name() -> String {
    "warden".to_owned()
}

fn default_otel_sample_ratio() -> f64 {
    1.0
}

fn default_otel_protocol() -> String {
    "grpc".to_owned()
}

/// Which `KvStore` backend to wire: in-process (dev/test) or Redis.
#[derive(Debug, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_backend")]
    pub backend: String,
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_state_backend(),
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_state_backend() -> String {
    "memory".to_owned()
}

fn default_key_prefix() -> String {
    "warden".to_owned()
}

/// Which `RecordStore` backend to wire: in-process (dev/test) or Postgres.
#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_backend")]
    pub backend: String,
    pub postgres_url: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: default_audit_backend(),
            postgres_url: None,
        }
    }
}

fn default_audit_backend() -> String {
    "memory".to_owned()
}

/// Security Plugin Host wiring: which built-in plugins run on every
/// request (§4.7). Model-backed moderation is opt-in since it requires a
/// provider credential of its own.
#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub pii_enabled: bool,
    #[serde(default = "default_true")]
    pub secrets_enabled: bool,
    #[serde(default = "default_true")]
    pub prompt_injection_enabled: bool,
    #[serde(default = "default_true")]
    pub code_injection_enabled: bool,
    #[serde(default)]
    pub moderation_model: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pii_enabled: true,
            secrets_enabled: true,
            prompt_injection_enabled: true,
            code_injection_enabled: true,
            moderation_model: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Provider Router load-balancing and retry configuration.
#[derive(Debug, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Force every model to resolve to the mock adapter, per §4.8's
    /// "mock adapter must be the only adapter selected in the test
    /// environment" requirement. Never set outside tests.
    #[serde(default)]
    pub mock_only: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_attempts: default_max_attempts(),
            mock_only: false,
        }
    }
}

fn default_strategy() -> String {
    "round_robin".to_owned()
}

fn default_max_attempts() -> u32 {
    3
}
