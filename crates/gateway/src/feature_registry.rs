use std::sync::Arc;

use warden_audit::RecordStore;
use warden_core::{AppId, Environment, ErrorCode, FeatureDenialReason, FeatureId, GatewayError};

/// Implements §4.4: resolves a [`warden_core::FeatureDescriptor`] from the
/// record store and runs its allow-list check. The descriptor's own `check`
/// method (core crate) holds the actual predicate logic; this wraps it with
/// the lookup and the stable wire error.
pub struct FeatureRegistry {
    store: Arc<dyn RecordStore>,
}

impl FeatureRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// `FEATURE_NOT_ALLOWED` for any denial reason, including an unknown
    /// feature (modeled as a descriptor lookup miss).
    pub async fn check(
        &self,
        app_id: &AppId,
        feature_id: &FeatureId,
        action: &str,
        model: &str,
        environment: Environment,
        estimated_tokens: u32,
    ) -> Result<(), GatewayError> {
        let descriptor = self
            .store
            .get_feature(app_id, feature_id)
            .await
            .map_err(|err| GatewayError::new(ErrorCode::Internal, err.to_string()))?
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorCode::FeatureNotAllowed,
                    format!("unknown feature '{feature_id}' for app '{app_id}'"),
                )
            })?;

        descriptor
            .check(action, model, environment, estimated_tokens)
            .map_err(|reason| GatewayError::new(ErrorCode::FeatureNotAllowed, denial_message(&reason)))
    }
}

fn denial_message(reason: &FeatureDenialReason) -> String {
    match reason {
        FeatureDenialReason::UnknownFeature => "unknown feature".to_owned(),
        FeatureDenialReason::ActionNotAllowed => "action is not in the feature's allowed set".to_owned(),
        FeatureDenialReason::ModelNotAllowed => "model is not in the feature's allowed set".to_owned(),
        FeatureDenialReason::EnvironmentNotAllowed => "environment is not in the feature's allowed set".to_owned(),
        FeatureDenialReason::TokenCapExceeded { cap, estimated } => {
            format!("estimated {estimated} tokens exceeds the feature's cap of {cap}")
        }
        FeatureDenialReason::FeatureDisabled => "feature is disabled".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use warden_audit_memory::InMemoryRecordStore;
    use warden_core::FeatureDescriptor;

    use super::*;

    fn store_with_feature() -> Arc<InMemoryRecordStore> {
        let store = Arc::new(InMemoryRecordStore::new());
        store.seed_feature(FeatureDescriptor {
            app_id: AppId::from("acme"),
            feature_id: FeatureId::from("chat-support"),
            allowed_actions: vec!["chat.completions".into()],
            allowed_models: vec!["gpt-4o".into()],
            allowed_environments: vec![Environment::Production],
            max_tokens_per_request: 4096,
            enabled: true,
        });
        store
    }

    #[tokio::test]
    async fn unknown_feature_is_denied() {
        let registry = FeatureRegistry::new(Arc::new(InMemoryRecordStore::new()));
        let err = registry
            .check(
                &AppId::from("acme"),
                &FeatureId::from("missing"),
                "chat.completions",
                "gpt-4o",
                Environment::Production,
                10,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FeatureNotAllowed);
    }

    #[tokio::test]
    async fn matching_request_is_allowed() {
        let registry = FeatureRegistry::new(store_with_feature());
        registry
            .check(
                &AppId::from("acme"),
                &FeatureId::from("chat-support"),
                "chat.completions",
                "gpt-4o",
                Environment::Production,
                10,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn model_outside_allow_list_is_denied() {
        let registry = FeatureRegistry::new(store_with_feature());
        let err = registry
            .check(
                &AppId::from("acme"),
                &FeatureId::from("chat-support"),
                "chat.completions",
                "claude-3",
                Environment::Production,
                10,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("model"));
    }
}
