use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use warden_core::ProviderKind;

use crate::adapter::ProviderAdapter;
use crate::error::ProviderError;
use crate::trace_context::inject_trace_context;
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, StreamChunk};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for Anthropic's Messages API. Anthropic separates the system
/// prompt from the message list and reports stop reasons under different
/// names, so both directions need translation.
pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn base_url<'a>(&self, base_url: Option<&'a str>) -> &'a str {
        base_url.unwrap_or(DEFAULT_BASE_URL)
    }
}

fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        _ => "stop",
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    ContentBlockDelta { delta: AnthropicDelta },
    MessageDelta { delta: AnthropicMessageDelta },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
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

fn build_body(request: &ChatRequest) -> serde_json::Value {
    let messages: Vec<_> = request
        .non_system_messages()
        .into_iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(4096),
    });
    if let Some(system) = request.system_prompt() {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url(base_url));
        let mut body = build_body(request);
        body["stream"] = json!(false);
        let builder = self
            .client
            .post(url)
            .header("x-api-key", credential.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response = inject_trace_context(builder)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }
        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let content = parsed.content.into_iter().map(|b| b.text).collect::<String>();
        Ok(ChatResponse {
            id: parsed.id,
            model: parsed.model,
            content,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            finish_reason: map_stop_reason(parsed.stop_reason.as_deref().unwrap_or("end_turn"))
                .to_owned(),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url(base_url));
        let mut body = build_body(request);
        body["stream"] = json!(true);
        let builder = self
            .client
            .post(url)
            .header("x-api-key", credential.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response = inject_trace_context(builder)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let model = request.model.clone();
        let id = format!("anthropic-{}", uuid::Uuid::new_v4());
        let byte_stream = response.bytes_stream();
        let chunk_stream = byte_stream.flat_map(move |chunk| {
            let events: Vec<Result<StreamChunk, ProviderError>> = match chunk {
                Ok(bytes) => parse_anthropic_events(&bytes, &id, &model),
                Err(e) => vec![Err(ProviderError::Connection(e.to_string()))],
            };
            stream::iter(events)
        });
        Ok(chunk_stream.boxed())
    }

    async fn embed(
        &self,
        _request: &EmbeddingRequest,
        _credential: &SecretString,
        _base_url: Option<&str>,
    ) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::Unsupported(
            "anthropic does not provide an embeddings API".into(),
        ))
    }
}

/// Translate one SSE frame of Anthropic's event stream into zero or more
/// OpenAI-shaped stream chunks.
fn parse_anthropic_events(bytes: &[u8], id: &str, model: &str) -> Vec<Result<StreamChunk, ProviderError>> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str::<AnthropicStreamEvent>(data).ok())
        .filter_map(|event| match event {
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                delta.text.map(|text| Ok(StreamChunk::delta(id, model, text)))
            }
            AnthropicStreamEvent::MessageDelta { delta } => delta
                .stop_reason
                .map(|reason| Ok(StreamChunk::done(id, model, map_stop_reason(&reason)))),
            AnthropicStreamEvent::Other => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn stop_reasons_map_to_openai_finish_reasons() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
    }

    #[test]
    fn system_message_separated_into_top_level_field() {
        let request = ChatRequest {
            model: "claude-3-opus".into(),
            messages: vec![
                ChatMessage { role: "system".into(), content: "be terse".into() },
                ChatMessage { role: "user".into(), content: "hi".into() },
            ],
            max_tokens: Some(100),
            temperature: None,
            stream: false,
        };
        let body = build_body(&request);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }
}
