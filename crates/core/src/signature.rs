use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{AppId, FeatureId, ModelId};

/// Deterministic fingerprint of one request's shape, used by the Abuse
/// Detector to recognize loops and duplicates. Matches the original
/// system's two-stage hash: first the messages alone, then the full
/// `(app, feature, model, input_hash)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignature(pub String);

/// Hash the normalized message list alone (stable under key ordering
/// because callers pass already-canonicalized JSON).
#[must_use]
pub fn hash_messages(canonical_messages_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_messages_json.as_bytes());
    hex::encode(hasher.finalize())[..16].to_owned()
}

/// Build the full request signature from app/feature/model and the
/// message-hash computed above.
#[must_use]
pub fn request_signature(
    app_id: &AppId,
    feature_id: &FeatureId,
    model_id: &ModelId,
    input_hash: &str,
) -> RequestSignature {
    let mut hasher = Sha256::new();
    hasher.update(format!("{app_id}:{feature_id}:{model_id}:{input_hash}").as_bytes());
    RequestSignature(hex::encode(hasher.finalize())[..16].to_owned())
}

/// Category of abuse the detector flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbuseType {
    SuspiciousPattern,
    LoopDetected,
    DuplicateRequest,
    RateSpike,
    SelfReference,
    RetryStorm,
    CostSpike,
}

impl AbuseType {
    /// Whether this finding blocks the request or is advisory only.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        !matches!(self, Self::CostSpike)
    }
}

/// Result of any abuse-detector check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseCheckResult {
    pub blocked: bool,
    pub abuse_type: Option<AbuseType>,
    pub reason: Option<String>,
    pub cooldown_seconds: Option<u64>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AbuseCheckResult {
    #[must_use]
    pub fn clear() -> Self {
        Self {
            blocked: false,
            abuse_type: None,
            reason: None,
            cooldown_seconds: None,
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn block(abuse_type: AbuseType, reason: impl Into<String>, cooldown_seconds: u64) -> Self {
        Self {
            blocked: true,
            abuse_type: Some(abuse_type),
            reason: Some(reason.into()),
            cooldown_seconds: Some(cooldown_seconds),
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn warn(abuse_type: AbuseType, reason: impl Into<String>) -> Self {
        Self {
            blocked: false,
            abuse_type: Some(abuse_type),
            reason: Some(reason.into()),
            cooldown_seconds: None,
            details: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_message_payloads_hash_identically() {
        let a = hash_messages(r#"[{"role":"user","content":"hi"}]"#);
        let b = hash_messages(r#"[{"role":"user","content":"hi"}]"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_apps_yield_different_full_signature() {
        let input_hash = hash_messages(r#"[{"role":"user","content":"hi"}]"#);
        let a = request_signature(
            &AppId::from("acme"),
            &FeatureId::from("chat"),
            &ModelId::from("gpt-4o"),
            &input_hash,
        );
        let b = request_signature(
            &AppId::from("other"),
            &FeatureId::from("chat"),
            &ModelId::from("gpt-4o"),
            &input_hash,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn cost_spike_is_never_blocking() {
        assert!(!AbuseType::CostSpike.is_blocking());
        assert!(AbuseType::LoopDetected.is_blocking());
    }
}
