use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable wire error code, used both for HTTP status selection and the
/// `error.code` field of the JSON error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthMissingKey,
    AuthInvalidKey,
    AuthEnvMismatch,
    PolicyModelBlocked,
    PolicyFeatureBlocked,
    FeatureNotAllowed,
    BudgetExceeded,
    RateLimited,
    AbuseBlocked,
    ContentBlocked,
    InputInvalid,
    ModelNotFound,
    UpstreamFailed,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::AuthMissingKey | Self::AuthInvalidKey => 401,
            Self::AuthEnvMismatch
            | Self::PolicyModelBlocked
            | Self::PolicyFeatureBlocked
            | Self::FeatureNotAllowed
            | Self::ContentBlocked => 403,
            Self::BudgetExceeded => 402,
            Self::RateLimited | Self::AbuseBlocked => 429,
            Self::InputInvalid => 400,
            Self::ModelNotFound => 404,
            Self::UpstreamFailed => 502,
            Self::Internal => 500,
        }
    }
}

/// Top-level pipeline error carrying the stable code plus a caller-facing
/// message and structured reasons (matched rule ids, abuse type, etc).
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl GatewayError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reasons: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(ErrorCode::AuthMissingKey.http_status(), 401);
        assert_eq!(ErrorCode::BudgetExceeded.http_status(), 402);
        assert_eq!(ErrorCode::AbuseBlocked.http_status(), 429);
        assert_eq!(ErrorCode::ModelNotFound.http_status(), 404);
        assert_eq!(ErrorCode::UpstreamFailed.http_status(), 502);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }
}
