use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AppId, Environment};

/// A registered caller application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub app_id: AppId,
    pub name: String,
    pub team: String,
    pub active: bool,
    #[serde(default)]
    pub allowed_providers: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_models: Option<Vec<String>>,
}

/// A gateway API key as persisted: only its hash is retained after issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_hash: String,
    pub key_prefix: String,
    pub app_id: AppId,
    pub environment: Environment,
    /// Envelope-encrypted upstream provider key, `ENC[AES256-GCM,...]`.
    pub encrypted_upstream_key: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Identity resolved by the Credential Resolver and threaded through the
/// rest of the pipeline as the authoritative caller context.
#[derive(Debug, Clone)]
pub struct Identity {
    pub app_id: AppId,
    pub environment: Environment,
    pub upstream_key: secrecy::SecretString,
    pub allowed_providers: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
}

/// Per-environment runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub environment: Environment,
    pub strict_mode: bool,
    pub honor_debug_headers: bool,
    pub security_scan_level: SecurityScanLevel,
    pub budget_multiplier: f64,
    #[serde(default)]
    pub allowed_models: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_models: Vec<String>,
    pub log_prompts: bool,
    pub log_responses: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityScanLevel {
    Off,
    Standard,
    Strict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_config_serde_roundtrip() {
        let cfg = EnvironmentConfig {
            environment: Environment::Production,
            strict_mode: true,
            honor_debug_headers: false,
            security_scan_level: SecurityScanLevel::Strict,
            budget_multiplier: 1.0,
            allowed_models: None,
            blocked_models: vec!["gpt-3.5-turbo".into()],
            log_prompts: false,
            log_responses: false,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EnvironmentConfig = serde_json::from_str(&json).unwrap();
        assert!(back.strict_mode);
        assert_eq!(back.blocked_models, vec!["gpt-3.5-turbo".to_owned()]);
    }
}
