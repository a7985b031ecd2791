use std::sync::Arc;

use regex::Regex;
use warden_core::ProviderKind;

use crate::adapter::ProviderAdapter;
use crate::adapters::{AnthropicAdapter, BedrockAdapter, MockAdapter, OpenAiCompatibleAdapter, VertexAdapter};
use crate::error::ProviderError;

struct PrefixRoute {
    prefix: &'static str,
    adapter: Arc<dyn ProviderAdapter>,
}

struct PatternRoute {
    pattern: Regex,
    adapter: Arc<dyn ProviderAdapter>,
}

/// Resolves a model id to the adapter that should handle it, per the
/// selection order: mock-only override, explicit prefix, then pattern match
/// against the bare model name. First match wins.
pub struct AdapterRegistry {
    mock_only: bool,
    mock: Arc<dyn ProviderAdapter>,
    prefixes: Vec<PrefixRoute>,
    patterns: Vec<PatternRoute>,
}

impl AdapterRegistry {
    /// Empty registry with only the mock adapter registered. Callers add
    /// prefix/pattern routes with [`Self::register_prefix`] and
    /// [`Self::register_pattern`], or use [`Self::standard`] for the
    /// conventional wiring.
    #[must_use]
    pub fn new(mock_only: bool) -> Self {
        Self {
            mock_only,
            mock: Arc::new(MockAdapter),
            prefixes: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// The conventional registry: OpenAI-compatible, Anthropic, Bedrock, and
    /// Vertex adapters wired to the prefixes and model-name patterns named
    /// in the adapter selection rules.
    #[must_use]
    pub fn standard(
        mock_only: bool,
        openai_compatible: Arc<OpenAiCompatibleAdapter>,
        anthropic: Arc<AnthropicAdapter>,
        bedrock: Arc<BedrockAdapter>,
        vertex: Arc<VertexAdapter>,
    ) -> Self {
        let mut registry = Self::new(mock_only);
        registry.register_prefix("bedrock/", bedrock.clone());
        registry.register_prefix("ollama/", openai_compatible.clone());
        registry.register_prefix("lmstudio/", openai_compatible.clone());
        registry.register_pattern(
            Regex::new(r"(?i)^gpt-").expect("static regex"),
            openai_compatible,
        );
        registry.register_pattern(Regex::new(r"(?i)^claude-").expect("static regex"), anthropic);
        registry.register_pattern(Regex::new(r"(?i)^gemini-").expect("static regex"), vertex);
        registry.register_pattern(
            Regex::new(r"(?i)^(anthropic|amazon|meta|mistral|cohere|ai21)\.")
                .expect("static regex"),
            bedrock,
        );
        registry
    }

    pub fn register_prefix(&mut self, prefix: &'static str, adapter: Arc<dyn ProviderAdapter>) {
        self.prefixes.push(PrefixRoute { prefix, adapter });
    }

    pub fn register_pattern(&mut self, pattern: Regex, adapter: Arc<dyn ProviderAdapter>) {
        self.patterns.push(PatternRoute { pattern, adapter });
    }

    /// Resolve `model_id` to its adapter and the upstream-facing model id
    /// (with any matched routing prefix stripped).
    ///
    /// # Errors
    /// Returns [`ProviderError::NoProvider`] when no mock override, prefix,
    /// or pattern matches.
    pub fn resolve(&self, model_id: &str) -> Result<(Arc<dyn ProviderAdapter>, String), ProviderError> {
        if self.mock_only {
            return Ok((self.mock.clone(), model_id.to_owned()));
        }
        for route in &self.prefixes {
            if let Some(rest) = model_id.strip_prefix(route.prefix) {
                return Ok((route.adapter.clone(), rest.to_owned()));
            }
        }
        for route in &self.patterns {
            if route.pattern.is_match(model_id) {
                return Ok((route.adapter.clone(), model_id.to_owned()));
            }
        }
        Err(ProviderError::NoProvider(model_id.to_owned()))
    }

    #[must_use]
    pub fn kind_for(&self, model_id: &str) -> Option<ProviderKind> {
        self.resolve(model_id).ok().map(|(adapter, _)| adapter.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AdapterRegistry {
        AdapterRegistry::standard(
            false,
            Arc::new(OpenAiCompatibleAdapter::new(reqwest::Client::new())),
            Arc::new(AnthropicAdapter::new(reqwest::Client::new())),
            Arc::new(BedrockAdapter::new(
                aws_sdk_bedrockruntime::Client::from_conf(
                    aws_sdk_bedrockruntime::Config::builder()
                        .behavior_version(aws_config::BehaviorVersion::latest())
                        .region(aws_config::Region::new("us-east-1"))
                        .build(),
                ),
            )),
            Arc::new(VertexAdapter::new(reqwest::Client::new(), "proj", "us-central1")),
        )
    }

    #[test]
    fn mock_only_short_circuits_every_model() {
        let registry = AdapterRegistry::new(true);
        let (adapter, resolved) = registry.resolve("gpt-4o").unwrap();
        assert_eq!(adapter.kind(), ProviderKind::Mock);
        assert_eq!(resolved, "gpt-4o");
    }

    #[test]
    fn explicit_prefix_wins_and_is_stripped() {
        let registry = registry();
        let (adapter, resolved) = registry.resolve("ollama/llama3").unwrap();
        assert_eq!(adapter.kind(), ProviderKind::OpenAiCompatible);
        assert_eq!(resolved, "llama3");
    }

    #[test]
    fn pattern_matches_model_family() {
        let registry = registry();
        assert_eq!(registry.kind_for("gpt-4o"), Some(ProviderKind::OpenAiCompatible));
        assert_eq!(registry.kind_for("claude-3-5-sonnet"), Some(ProviderKind::Anthropic));
        assert_eq!(registry.kind_for("gemini-1.5-pro"), Some(ProviderKind::Vertex));
        assert_eq!(registry.kind_for("anthropic.claude-3-haiku"), Some(ProviderKind::Bedrock));
    }

    #[test]
    fn unknown_model_has_no_provider() {
        let registry = registry();
        let err = registry.resolve("some-unknown-model").unwrap_err();
        assert!(matches!(err, ProviderError::NoProvider(_)));
    }
}
