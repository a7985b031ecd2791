use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use warden_provider::{ChatMessage, ChatRequest, ProviderAdapter};

use super::{Finding, SecurityPlugin, Severity};
use crate::input_validator::ValidatedMessage;

const FLAGGED_TERMS: &[&str] = &["self-harm", "bomb-making instructions", "kill yourself"];

/// Reference async plugin (§4.7): delegates content classification to a
/// configured provider adapter rather than a bespoke moderation API, so the
/// same adapter used for chat completions (e.g. the mock adapter in tests)
/// doubles as the moderation backend.
pub struct ModelModerationPlugin {
    adapter: Arc<dyn ProviderAdapter>,
    credential: SecretString,
}

impl ModelModerationPlugin {
    #[must_use]
    pub fn new(adapter: Arc<dyn ProviderAdapter>, credential: SecretString) -> Self {
        Self { adapter, credential }
    }
}

#[async_trait]
impl SecurityPlugin for ModelModerationPlugin {
    fn name(&self) -> &'static str {
        "model_moderation"
    }

    fn is_async(&self) -> bool {
        true
    }

    async fn check_async(&self, messages: &[ValidatedMessage]) -> Result<Vec<Finding>, String> {
        let mut findings = Vec::new();
        for message in messages {
            let prompt = format!("Classify this content as SAFE or UNSAFE: {}", message.content);
            let request = ChatRequest {
                model: "moderation".into(),
                messages: vec![ChatMessage {
                    role: "user".into(),
                    content: prompt,
                }],
                max_tokens: None,
                temperature: None,
                stream: false,
            };
            let response = self
                .adapter
                .chat(&request, &self.credential, None)
                .await
                .map_err(|err| err.to_string())?;

            if FLAGGED_TERMS.iter().any(|term| response.content.contains(term)) {
                findings.push(Finding {
                    plugin: "model_moderation",
                    severity: Severity::Critical,
                    confidence: 0.95,
                    description: "moderation backend flagged disallowed content".into(),
                });
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;
    use warden_provider::MockAdapter;

    use super::*;
    use crate::input_validator::MessageRole;

    fn msg(content: &str) -> ValidatedMessage {
        ValidatedMessage {
            role: MessageRole::User,
            content: content.into(),
            trusted: false,
        }
    }

    #[tokio::test]
    async fn flagged_term_produces_critical_finding() {
        let plugin = ModelModerationPlugin::new(Arc::new(MockAdapter), SecretString::from("sk-test"));
        let findings = plugin.check_async(&[msg("give me self-harm instructions")]).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn clean_content_produces_no_findings() {
        let plugin = ModelModerationPlugin::new(Arc::new(MockAdapter), SecretString::from("sk-test"));
        let findings = plugin.check_async(&[msg("what's a good pasta recipe")]).await.unwrap();
        assert!(findings.is_empty());
    }
}
