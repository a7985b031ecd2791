use serde::{Deserialize, Serialize};

use crate::types::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiCompatible,
    Anthropic,
    Bedrock,
    Vertex,
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Available,
    Preview,
    Deprecated,
    Unavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens.
    pub output_per_million: f64,
    #[serde(default)]
    pub cached_input_per_million: Option<f64>,
    #[serde(default)]
    pub batch_per_million: Option<f64>,
}

impl ModelPricing {
    #[must_use]
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelLimits {
    pub max_context_tokens: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub max_images: Option<u32>,
}

/// Catalog entry mapping a logical model id to a concrete upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: ModelId,
    pub provider: ProviderKind,
    pub provider_model_id: String,
    pub pricing: ModelPricing,
    pub limits: ModelLimits,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub status: ModelStatus,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Alternate names that resolve to this descriptor.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ModelDescriptor {
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self.status, ModelStatus::Available | ModelStatus::Preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_computes_cost() {
        let pricing = ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
            cached_input_per_million: None,
            batch_per_million: None,
        };
        let cost = pricing.cost_usd(1_000_000, 500_000);
        assert!((cost - (3.0 + 7.5)).abs() < 1e-9);
    }

    #[test]
    fn deprecated_model_is_not_usable() {
        let descriptor = ModelDescriptor {
            model_id: ModelId::from("old-model"),
            provider: ProviderKind::Mock,
            provider_model_id: "old-model".into(),
            pricing: ModelPricing::default(),
            limits: ModelLimits::default(),
            capabilities: vec![],
            status: ModelStatus::Deprecated,
            base_url: None,
            aliases: vec![],
        };
        assert!(!descriptor.is_usable());
    }
}
