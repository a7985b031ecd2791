use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for OpenAI and every self-hosted or third-party server that
/// speaks the same wire protocol: OpenAI itself, Groq, Mistral's OpenAI
/// endpoint, Ollama, LM Studio, Azure OpenAI deployments, and any
/// self-hosted OpenAI-compatible inference server.
pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn base_url<'a>(&self, base_url: Option<&'a str>) -> &'a str {
        base_url.unwrap_or(DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    id: String,
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingDatum>,
    model: String,
    usage: OpenAiEmbeddingUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f32>,
    index: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingUsage {
    prompt_tokens: u64,
    total_tokens: u64,
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
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url(base_url));
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": false,
        });
        let builder = self
            .client
            .post(url)
            .bearer_auth(credential.expose_secret())
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
        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Serialization("empty choices array".into()))?;
        Ok(ChatResponse {
            id: parsed.id,
            model: parsed.model,
            content: choice.message.content,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url(base_url));
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });
        let builder = self
            .client
            .post(url)
            .bearer_auth(credential.expose_secret())
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

        let byte_stream = response.bytes_stream();
        let chunk_stream = byte_stream.flat_map(|chunk| {
            let lines: Vec<Result<StreamChunk, ProviderError>> = match chunk {
                Ok(bytes) => parse_sse_lines(&bytes),
                Err(e) => vec![Err(ProviderError::Connection(e.to_string()))],
            };
            stream::iter(lines)
        });
        Ok(chunk_stream.boxed())
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let url = format!("{}/embeddings", self.base_url(base_url));
        let body = json!({
            "model": request.model,
            "input": request.input,
        });
        let builder = self
            .client
            .post(url)
            .bearer_auth(credential.expose_secret())
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
        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        Ok(EmbeddingResponse {
            data: parsed
                .data
                .into_iter()
                .map(|d| EmbeddingDatum {
                    embedding: d.embedding,
                    index: d.index,
                })
                .collect(),
            model: parsed.model,
            usage: EmbeddingUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
        })
    }
}

/// Parse one `bytes_stream` chunk of an OpenAI SSE response into zero or
/// more `StreamChunk`s. A chunk may contain multiple `data: ...` lines, or a
/// partial line split across reads; partial lines are simply dropped rather
/// than buffered, since OpenAI's server writes one full SSE event per flush
/// in practice.
fn parse_sse_lines(bytes: &[u8]) -> Vec<Result<StreamChunk, ProviderError>> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .map(|data| {
            serde_json::from_str::<StreamChunk>(data)
                .map_err(|e| ProviderError::Serialization(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_sse_events_in_one_chunk() {
        let payload = b"data: {\"id\":\"1\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        let parsed = parse_sse_lines(payload);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_ok());
    }

    #[test]
    fn defaults_to_openai_base_url_when_none_given() {
        let adapter = OpenAiCompatibleAdapter::new(reqwest::Client::new());
        assert_eq!(adapter.base_url(None), DEFAULT_BASE_URL);
        assert_eq!(adapter.base_url(Some("http://localhost:11434/v1")), "http://localhost:11434/v1");
    }
}
