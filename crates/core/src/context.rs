use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::identity::Identity;
use crate::types::{AppId, Environment, FeatureId, ModelId, RequestId};

/// Context threaded through every pipeline stage and every condition
/// predicate in the Policy Engine. Built once, after credential
/// resolution, and never mutated after the model/feature fields are filled
/// in by their respective resolution steps.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub app_id: AppId,
    pub environment: Environment,
    pub feature_id: FeatureId,
    pub model_id: Option<ModelId>,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub estimated_tokens: u32,
    pub dry_run: bool,
    pub debug: bool,
    pub timestamp: DateTime<Utc>,
    /// Arbitrary extra fields condition predicates may reference by name.
    pub extra: HashMap<String, String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: RequestId, identity: &Identity, feature_id: FeatureId, now: DateTime<Utc>) -> Self {
        Self {
            request_id,
            app_id: identity.app_id.clone(),
            environment: identity.environment,
            feature_id,
            model_id: None,
            user_id: None,
            org_id: None,
            estimated_tokens: 0,
            dry_run: false,
            debug: false,
            timestamp: now,
            extra: HashMap::new(),
        }
    }

    /// Look up a named field for condition evaluation. Well-known fields
    /// are served directly; anything else falls back to `extra`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "app_id" => Some(self.app_id.to_string()),
            "environment" => Some(self.environment.label().to_owned()),
            "feature_id" => Some(self.feature_id.to_string()),
            "model_id" => self.model_id.as_ref().map(ToString::to_string),
            "user_id" => self.user_id.clone(),
            "org_id" => self.org_id.clone(),
            "estimated_tokens" => Some(self.estimated_tokens.to_string()),
            _ => self.extra.get(name).cloned(),
        }
    }
}
