use std::sync::LazyLock;

use async_trait::async_trait;
use regex::RegexSet;

use super::{Finding, SecurityPlugin, Severity};
use crate::input_validator::ValidatedMessage;

static PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}", // email address
        r"\b(?:\d[ -]*?){13,16}\b",                         // credit-card-like digit run
        r"\b\d{3}-\d{2}-\d{4}\b",                            // US SSN-shaped digit run
    ])
    .expect("static pattern set")
});

/// Flags likely personally-identifying information in message content
/// (§4.7).
pub struct PiiPlugin;

#[async_trait]
impl SecurityPlugin for PiiPlugin {
    fn name(&self) -> &'static str {
        "pii"
    }

    fn check(&self, messages: &[ValidatedMessage]) -> Vec<Finding> {
        messages
            .iter()
            .filter(|m| PATTERNS.is_match(&m.content))
            .map(|_| Finding {
                plugin: "pii",
                severity: Severity::Medium,
                confidence: 0.7,
                description: "message content matches a PII pattern".into(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_validator::MessageRole;

    fn msg(content: &str) -> ValidatedMessage {
        ValidatedMessage {
            role: MessageRole::User,
            content: content.into(),
            trusted: false,
        }
    }

    #[test]
    fn email_address_is_flagged() {
        let findings = PiiPlugin.check(&[msg("reach me at jane.doe@example.com")]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn ssn_shaped_run_is_flagged() {
        assert_eq!(PiiPlugin.check(&[msg("my ssn is 123-45-6789")]).len(), 1);
    }

    #[test]
    fn plain_text_is_not_flagged() {
        assert!(PiiPlugin.check(&[msg("what time is it")]).is_empty());
    }
}
