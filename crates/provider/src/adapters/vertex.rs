use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use google_cloud_auth::credentials::Builder as CredentialsBuilder;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use warden_core::ProviderKind;

use crate::adapter::ProviderAdapter;
use crate::error::ProviderError;
use crate::trace_context::inject_trace_context;
use crate::types::{
    ChatRequest, ChatResponse, EmbeddingDatum, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage,
    StreamChunk,
};

/// Adapter for Vertex AI's Gemini models. Authenticates with ambient Google
/// Cloud application-default credentials, not the gateway's per-application
/// upstream key; `credential` is accepted for trait parity but unused.
pub struct VertexAdapter {
    client: reqwest::Client,
    project_id: String,
    location: String,
}

impl VertexAdapter {
    #[must_use]
    pub fn new(client: reqwest::Client, project_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
            location: location.into(),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:{method}",
            location = self.location,
            project = self.project_id,
            model = model,
            method = method,
        )
    }

    async fn bearer_token(&self) -> Result<String, ProviderError> {
        let credentials = CredentialsBuilder::default()
            .build()
            .map_err(|e| ProviderError::Configuration(format!("ambient gcp credentials: {e}")))?;
        let headers = credentials
            .headers(http::Extensions::new())
            .await
            .map_err(|e| ProviderError::Configuration(format!("gcp token fetch failed: {e}")))?;
        headers
            .iter()
            .find(|(name, _)| name.as_str().eq_ignore_ascii_case("authorization"))
            .and_then(|(_, value)| value.to_str().ok())
            .map(|v| v.trim_start_matches("Bearer ").to_owned())
            .ok_or_else(|| ProviderError::Configuration("gcp credentials returned no bearer token".into()))
    }
}

fn gemini_role(role: &str) -> &'static str {
    if role == "assistant" { "model" } else { "user" }
}

fn build_body(request: &ChatRequest) -> serde_json::Value {
    let contents: Vec<_> = request
        .non_system_messages()
        .into_iter()
        .map(|m| {
            json!({
                "role": gemini_role(&m.role),
                "parts": [{"text": m.content}],
            })
        })
        .collect();
    let mut body = json!({ "contents": contents });
    if let Some(system) = request.system_prompt() {
        body["systemInstruction"] = json!({ "parts": [{"text": system}] });
    }
    let mut generation_config = serde_json::Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".into(), json!(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".into(), json!(temperature));
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = serde_json::Value::Object(generation_config);
    }
    body
}

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        _ => "stop",
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

fn classify_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited
    } else if status.is_server_error() {
        ProviderError::Connection(format!("upstream {status}: {body}"))
    } else {
        ProviderError::ExecutionFailed(format!("upstream {status}: {body}"))
    }
}

#[async_trait]
impl ProviderAdapter for VertexAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vertex
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        _credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let token = self.bearer_token().await?;
        let url = base_url.map_or_else(
            || self.endpoint(&request.model, "generateContent"),
            ToOwned::to_owned,
        );
        let builder = self.client.post(url).bearer_auth(token).json(&build_body(request));
        let response = inject_trace_context(builder)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }
        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Serialization("gemini response had no candidates".into()))?;
        let content = candidate.content.parts.into_iter().map(|p| p.text).collect::<String>();
        let usage = parsed.usage_metadata.unwrap_or(GeminiUsage {
            prompt_token_count: 0,
            candidates_token_count: 0,
        });
        Ok(ChatResponse {
            id: uuid::Uuid::new_v4().to_string(),
            model: request.model.clone(),
            content,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            finish_reason: map_finish_reason(candidate.finish_reason.as_deref().unwrap_or("STOP")).to_owned(),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        // Vertex's streamGenerateContent yields a JSON array incrementally;
        // buffering the whole response and replaying it as one chunk keeps
        // translation logic in one place until true incremental parsing is
        // needed.
        let response = self.chat(request, credential, base_url).await?;
        let id = response.id.clone();
        let model = response.model.clone();
        let delta = StreamChunk::delta(&id, &model, response.content);
        let done = StreamChunk::done(&id, &model, response.finish_reason);
        Ok(stream::iter(vec![Ok(delta), Ok(done)]).boxed())
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        _credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let token = self.bearer_token().await?;
        let url = base_url.map_or_else(
            || self.endpoint(&request.model, "predict"),
            ToOwned::to_owned,
        );
        let instances: Vec<_> = request.input.iter().map(|text| json!({"content": text})).collect();
        let body = json!({ "instances": instances });
        let builder = self.client.post(url).bearer_auth(token).json(&body);
        let response = inject_trace_context(builder)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }
        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let predictions = parsed
            .get("predictions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::Serialization("vertex response missing predictions".into()))?;
        let mut prompt_tokens = 0u64;
        let data = predictions
            .iter()
            .enumerate()
            .map(|(index, prediction)| {
                let embedding = prediction
                    .pointer("/embeddings/values")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                    .filter_map(serde_json::Value::as_f64)
                    .map(|v| v as f32)
                    .collect();
                if let Some(count) = prediction.pointer("/embeddings/statistics/token_count").and_then(serde_json::Value::as_u64) {
                    prompt_tokens += count;
                }
                EmbeddingDatum { embedding, index: index as u32 }
            })
            .collect();
        Ok(EmbeddingResponse {
            data,
            model: request.model.clone(),
            usage: EmbeddingUsage {
                prompt_tokens,
                total_tokens: prompt_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn gemini_role_maps_assistant_to_model() {
        assert_eq!(gemini_role("assistant"), "model");
        assert_eq!(gemini_role("user"), "user");
    }

    #[test]
    fn system_instruction_separated_from_contents() {
        let request = ChatRequest {
            model: "gemini-1.5-pro".into(),
            messages: vec![
                ChatMessage { role: "system".into(), content: "be terse".into() },
                ChatMessage { role: "user".into(), content: "hi".into() },
            ],
            max_tokens: Some(256),
            temperature: Some(0.2),
            stream: false,
        };
        let body = build_body(&request);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn finish_reasons_map_to_openai_shape() {
        assert_eq!(map_finish_reason("MAX_TOKENS"), "length");
        assert_eq!(map_finish_reason("SAFETY"), "content_filter");
        assert_eq!(map_finish_reason("STOP"), "stop");
    }
}
