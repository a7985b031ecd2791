use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use warden_core::{ErrorCode, GatewayError};

/// Errors that can occur while running the gateway's HTTP surface. Gateway
/// admission denials pass through [`Self::Gateway`] and carry their own
/// stable wire code; everything else here is a server-boundary concern
/// (config, bind failure, malformed request body).
///
/// Carries the HTTP-layer request id (generated at the handler boundary,
/// independent of the pipeline's internal trace id — `GatewayError` does
/// not surface that id on a denial path) so every error body can echo it.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{source}")]
    Gateway { source: GatewayError, request_id: String },

    #[error("malformed request: {message}")]
    BadRequest { message: String, request_id: String },
}

impl ServerError {
    #[must_use]
    pub fn from_gateway(source: GatewayError, request_id: impl Into<String>) -> Self {
        Self::Gateway {
            source,
            request_id: request_id.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            request_id: request_id.into(),
        }
    }

    fn wire_code(&self) -> &'static str {
        match self {
            Self::Gateway { source, .. } => wire_code(source.code),
            Self::BadRequest { .. } => "INPUT_INVALID",
            Self::Config(_) | Self::Io(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Gateway { source, .. } => status_for(source.code),
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reasons(&self) -> Vec<String> {
        match self {
            Self::Gateway { source, .. } => source.reasons.clone(),
            _ => Vec::new(),
        }
    }

    fn request_id(&self) -> Option<&str> {
        match self {
            Self::Gateway { request_id, .. } | Self::BadRequest { request_id, .. } => Some(request_id),
            Self::Config(_) | Self::Io(_) => None,
        }
    }
}

/// Maps the stable [`ErrorCode`] enum to the wire code strings named in
/// §6's error code table (`AUTH_MISSING_KEY`, `BUDGET_EXCEEDED`, ...).
fn wire_code(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::AuthMissingKey => "AUTH_MISSING_KEY",
        ErrorCode::AuthInvalidKey => "AUTH_INVALID_KEY",
        ErrorCode::AuthEnvMismatch => "AUTH_ENV_MISMATCH",
        ErrorCode::PolicyModelBlocked => "POLICY_MODEL_BLOCKED",
        ErrorCode::PolicyFeatureBlocked => "POLICY_FEATURE_BLOCKED",
        ErrorCode::FeatureNotAllowed => "FEATURE_NOT_ALLOWED",
        ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
        ErrorCode::RateLimited => "RATE_LIMITED",
        ErrorCode::AbuseBlocked => "ABUSE_BLOCKED",
        ErrorCode::ContentBlocked => "CONTENT_BLOCKED",
        ErrorCode::InputInvalid => "INPUT_INVALID",
        ErrorCode::ModelNotFound => "MODEL_NOT_FOUND",
        ErrorCode::UpstreamFailed => "UPSTREAM_FAILED",
        ErrorCode::Internal => "INTERNAL",
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.wire_code();
        let reasons = self.reasons();
        let request_id = self.request_id().map(str::to_owned).unwrap_or_default();
        let message = self.to_string();

        let body = Json(serde_json::json!({
            "error": {
                "code": code,
                "message": message,
                "request_id": request_id,
                "reasons": reasons,
            }
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}
