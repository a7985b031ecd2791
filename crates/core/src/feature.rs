use serde::{Deserialize, Serialize};

use crate::types::{AppId, Environment, FeatureId};

/// Per-application named use-case with its own allow-lists and token cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub app_id: AppId,
    pub feature_id: FeatureId,
    pub allowed_actions: Vec<String>,
    pub allowed_models: Vec<String>,
    pub allowed_environments: Vec<Environment>,
    pub max_tokens_per_request: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Reason a Feature Registry check failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDenialReason {
    UnknownFeature,
    ActionNotAllowed,
    ModelNotAllowed,
    EnvironmentNotAllowed,
    TokenCapExceeded { cap: u32, estimated: u32 },
    FeatureDisabled,
}

impl FeatureDescriptor {
    #[must_use]
    pub fn check(
        &self,
        action: &str,
        model: &str,
        environment: Environment,
        estimated_tokens: u32,
    ) -> Result<(), FeatureDenialReason> {
        if !self.enabled {
            return Err(FeatureDenialReason::FeatureDisabled);
        }
        if !self.allowed_actions.iter().any(|a| a == action) {
            return Err(FeatureDenialReason::ActionNotAllowed);
        }
        if !self.allowed_models.iter().any(|m| m == model) {
            return Err(FeatureDenialReason::ModelNotAllowed);
        }
        if !self.allowed_environments.contains(&environment) {
            return Err(FeatureDenialReason::EnvironmentNotAllowed);
        }
        if estimated_tokens > self.max_tokens_per_request {
            return Err(FeatureDenialReason::TokenCapExceeded {
                cap: self.max_tokens_per_request,
                estimated: estimated_tokens,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature() -> FeatureDescriptor {
        FeatureDescriptor {
            app_id: AppId::from("acme"),
            feature_id: FeatureId::from("chat"),
            allowed_actions: vec!["chat.completions".into()],
            allowed_models: vec!["gpt-4o".into()],
            allowed_environments: vec![Environment::Production],
            max_tokens_per_request: 4096,
            enabled: true,
        }
    }

    #[test]
    fn allows_matching_request() {
        assert!(
            feature()
                .check("chat.completions", "gpt-4o", Environment::Production, 100)
                .is_ok()
        );
    }

    #[test]
    fn denies_unlisted_model() {
        assert_eq!(
            feature()
                .check("chat.completions", "claude-3", Environment::Production, 100)
                .unwrap_err(),
            FeatureDenialReason::ModelNotAllowed
        );
    }

    #[test]
    fn denies_token_cap_exceeded() {
        let err = feature()
            .check("chat.completions", "gpt-4o", Environment::Production, 5000)
            .unwrap_err();
        assert!(matches!(err, FeatureDenialReason::TokenCapExceeded { .. }));
    }

    #[test]
    fn denies_disabled_feature() {
        let mut f = feature();
        f.enabled = false;
        assert_eq!(
            f.check("chat.completions", "gpt-4o", Environment::Production, 1)
                .unwrap_err(),
            FeatureDenialReason::FeatureDisabled
        );
    }
}
