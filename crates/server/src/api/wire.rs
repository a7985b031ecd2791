//! OpenAI wire-format request/response bodies (§6) and the header-parsing
//! helpers shared by the chat-completions and embeddings handlers.

use std::str::FromStr;

use axum::http::HeaderMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use warden_core::{Environment, ErrorCode, FeatureId, GatewayError};

use crate::error::ServerError;

/// One message in an inbound `/v1/chat/completions` body.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionsBody {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    /// OpenAI's end-user identifier field, carried through as the
    /// pipeline's `user_id` for budget/policy scoping.
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: ChatCompletionUsage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_chain: Option<Vec<String>>,
}

/// Accepts either OpenAI's `input: "text"` or `input: ["a", "b"]` shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingsInput {
    One(String),
    Many(Vec<String>),
}

impl EmbeddingsInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsBody {
    pub model: String,
    pub input: EmbeddingsInput,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingDatumResponse {
    pub object: &'static str,
    pub embedding: Vec<f32>,
    pub index: u32,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsUsageResponse {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub object: &'static str,
    pub data: Vec<EmbeddingDatumResponse>,
    pub model: String,
    pub usage: EmbeddingsUsageResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Everything the request-control headers (§6) resolve to, independent of
/// which endpoint is being called.
pub struct ParsedHeaders {
    pub presented_key: String,
    pub overridden_upstream_key: Option<SecretString>,
    pub feature_id: FeatureId,
    pub declared_environment: Environment,
    pub dry_run: bool,
    pub debug: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name).is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Parses `X-API-Key`, `Authorization`, `X-Feature-Id`, `X-Dry-Run`,
/// `X-Debug`, and `X-Environment` (§6). `request_id` is only used to stamp
/// an early failure's error body.
///
/// # Errors
/// `AUTH_MISSING_KEY` if `X-API-Key` is absent, or a malformed-request
/// error if `X-Environment` is present but unrecognized.
pub fn parse_headers(headers: &HeaderMap, request_id: &str) -> Result<ParsedHeaders, ServerError> {
    let presented_key = header_str(headers, "x-api-key").unwrap_or_default().to_owned();
    if presented_key.is_empty() {
        return Err(ServerError::from_gateway(
            GatewayError::new(ErrorCode::AuthMissingKey, "missing X-API-Key header"),
            request_id,
        ));
    }

    let overridden_upstream_key = header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .map(|v| SecretString::from(v.to_owned()));

    let feature_id = header_str(headers, "x-feature-id")
        .map(FeatureId::from)
        .unwrap_or_else(|| FeatureId::from("default"));

    let declared_environment = match header_str(headers, "x-environment") {
        Some(raw) => Environment::from_str(raw)
            .map_err(|_| ServerError::bad_request(format!("unknown X-Environment value '{raw}'"), request_id))?,
        // No declared environment defaults to the strictest binding; a key
        // bound to any other environment will then fail the bind check
        // rather than silently running in a looser mode.
        None => Environment::Production,
    };

    Ok(ParsedHeaders {
        presented_key,
        overridden_upstream_key,
        feature_id,
        declared_environment,
        dry_run: header_flag(headers, "x-dry-run"),
        debug: header_flag(headers, "x-debug"),
    })
}
