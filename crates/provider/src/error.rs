use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while dispatching to a provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No adapter matched the requested model id.
    #[error("model_no_provider: no adapter registered for model '{0}'")]
    NoProvider(String),

    /// The adapter failed to execute the request.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The provider did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The adapter or its credential was misconfigured.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The provider rejected the request due to rate limiting.
    #[error("rate limited")]
    RateLimited,

    /// The upstream response could not be parsed into the canonical shape.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The adapter does not implement this operation (e.g. Anthropic has no
    /// embeddings endpoint).
    #[error("operation not supported by this provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Whether the router should treat this as transient and worth retrying
    /// against the next endpoint.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(ProviderError::Connection("reset".into()).is_retryable());
        assert!(ProviderError::RateLimited.is_retryable());
    }

    #[test]
    fn non_retryable_errors() {
        assert!(!ProviderError::NoProvider("x".into()).is_retryable());
        assert!(!ProviderError::ExecutionFailed("x".into()).is_retryable());
        assert!(!ProviderError::Configuration("x".into()).is_retryable());
        assert!(!ProviderError::Unsupported("embeddings".into()).is_retryable());
    }
}
