mod code_injection;
mod moderation;
mod pii;
mod prompt_injection;
mod secrets;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

pub use code_injection::CodeInjectionPlugin;
pub use moderation::ModelModerationPlugin;
pub use pii::PiiPlugin;
pub use prompt_injection::PromptInjectionPlugin;
pub use secrets::SecretsPlugin;

use crate::input_validator::ValidatedMessage;

const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Severity of one security finding (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn weight(self) -> f64 {
        match self {
            Self::Low => 0.1,
            Self::Medium => 0.3,
            Self::High => 0.7,
            Self::Critical => 1.0,
        }
    }
}

/// Overall risk bucket reported alongside the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// A single piece of evidence surfaced by one plugin.
#[derive(Debug, Clone)]
pub struct Finding {
    pub plugin: &'static str,
    pub severity: Severity,
    pub confidence: f64,
    pub description: String,
}

/// A content-security detector. Implementations are either purely
/// synchronous pattern matchers (`check`) or delegate to an external
/// service (`check_async`); the host calls whichever the plugin actually
/// implements and ignores the other.
#[async_trait]
pub trait SecurityPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool {
        true
    }

    /// Synchronous, in-process check. Default no-op for async-only plugins.
    fn check(&self, _messages: &[ValidatedMessage]) -> Vec<Finding> {
        Vec::new()
    }

    /// Whether this plugin has an asynchronous check (e.g. a remote
    /// moderation call). Plugins that only implement `check` leave this
    /// `false` so the host doesn't spawn a pointless task for them.
    fn is_async(&self) -> bool {
        false
    }

    /// Out-of-process check. Default no-op for sync-only plugins.
    async fn check_async(&self, _messages: &[ValidatedMessage]) -> Result<Vec<Finding>, String> {
        Ok(Vec::new())
    }
}

/// Aggregate result of running every enabled plugin against one request.
#[derive(Debug, Clone)]
pub struct SecurityCheckResult {
    pub safe: bool,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub findings: Vec<Finding>,
    pub plugins_executed: Vec<&'static str>,
    pub plugins_failed: Vec<&'static str>,
}

/// Implements §4.7: fans every enabled plugin out in parallel, aggregates
/// findings into one risk score/level, and short-circuits to unsafe on any
/// critical-severity finding.
pub struct SecurityPluginHost {
    plugins: Vec<Arc<dyn SecurityPlugin>>,
    async_timeout: Duration,
}

impl SecurityPluginHost {
    #[must_use]
    pub fn new(plugins: Vec<Arc<dyn SecurityPlugin>>) -> Self {
        Self {
            plugins,
            async_timeout: DEFAULT_ASYNC_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_async_timeout(mut self, timeout: Duration) -> Self {
        self.async_timeout = timeout;
        self
    }

    pub async fn check(&self, messages: &[ValidatedMessage]) -> SecurityCheckResult {
        let enabled: Vec<_> = self.plugins.iter().filter(|p| p.enabled()).collect();

        let tasks = enabled.iter().map(|plugin| {
            let plugin = Arc::clone(plugin);
            let messages = messages.to_vec();
            async move {
                if plugin.is_async() {
                    let outcome = tokio::time::timeout(self.async_timeout, plugin.check_async(&messages)).await;
                    match outcome {
                        Ok(Ok(findings)) => (plugin.name(), Some(findings)),
                        Ok(Err(_)) | Err(_) => (plugin.name(), None),
                    }
                } else {
                    (plugin.name(), Some(plugin.check(&messages)))
                }
            }
        });

        let results = join_all(tasks).await;

        let mut findings = Vec::new();
        let mut plugins_executed = Vec::new();
        let mut plugins_failed = Vec::new();

        for (name, outcome) in results {
            match outcome {
                Some(plugin_findings) => {
                    plugins_executed.push(name);
                    findings.extend(plugin_findings);
                }
                None => plugins_failed.push(name),
            }
        }

        let has_critical = findings.iter().any(|f| f.severity == Severity::Critical);
        let max_severity = findings.iter().map(|f| f.severity).max();
        let risk_score = (findings
            .iter()
            .map(|f| f.severity.weight() * f.confidence)
            .sum::<f64>()
            / 2.0)
            .min(1.0);

        let risk_level = match max_severity {
            Some(Severity::Critical) => RiskLevel::Critical,
            Some(Severity::High) => RiskLevel::High,
            Some(Severity::Medium) => RiskLevel::Medium,
            Some(Severity::Low) | None => RiskLevel::Low,
        };

        SecurityCheckResult {
            safe: !has_critical,
            risk_level,
            risk_score,
            findings,
            plugins_executed,
            plugins_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::input_validator::MessageRole;

    struct AlwaysCritical;

    #[async_trait]
    impl SecurityPlugin for AlwaysCritical {
        fn name(&self) -> &'static str {
            "always_critical"
        }

        fn check(&self, _messages: &[ValidatedMessage]) -> Vec<Finding> {
            vec![Finding {
                plugin: "always_critical",
                severity: Severity::Critical,
                confidence: 1.0,
                description: "test".into(),
            }]
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl SecurityPlugin for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn is_async(&self) -> bool {
            true
        }

        async fn check_async(&self, _messages: &[ValidatedMessage]) -> Result<Vec<Finding>, String> {
            Err("backend unreachable".into())
        }
    }

    fn msg(content: &str) -> ValidatedMessage {
        ValidatedMessage {
            role: MessageRole::User,
            content: content.into(),
            trusted: false,
        }
    }

    #[tokio::test]
    async fn critical_finding_marks_unsafe() {
        let host = SecurityPluginHost::new(vec![Arc::new(AlwaysCritical)]);
        let result = host.check(&[msg("hello")]).await;
        assert!(!result.safe);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn failing_async_plugin_never_marks_unsafe() {
        let host = SecurityPluginHost::new(vec![Arc::new(AlwaysFails)]);
        let result = host.check(&[msg("hello")]).await;
        assert!(result.safe);
        assert_eq!(result.plugins_failed, vec!["always_fails"]);
        assert!(result.plugins_executed.is_empty());
    }

    #[tokio::test]
    async fn clean_content_has_no_findings() {
        let host = SecurityPluginHost::new(vec![Arc::new(SecretsPlugin), Arc::new(PiiPlugin)]);
        let result = host.check(&[msg("what's the weather like today?")]).await;
        assert!(result.safe);
        assert!(result.findings.is_empty());
    }
}
