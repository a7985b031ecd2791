use async_trait::async_trait;
use aws_sdk_bedrockruntime::Client;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, Message as BedrockMessage, StopReason,
};
use futures::stream::{self, BoxStream, StreamExt};
use secrecy::SecretString;
use warden_core::ProviderKind;

use crate::adapter::ProviderAdapter;
use crate::error::ProviderError;
use crate::types::{
    ChatRequest, ChatResponse, EmbeddingDatum, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage,
    StreamChunk,
};

/// Adapter for AWS Bedrock's Converse API. Bedrock authenticates with
/// ambient AWS credentials resolved by `aws-config` (instance role,
/// environment, or profile) rather than the gateway's per-application
/// upstream key, so `credential` is accepted for signature parity with the
/// other adapters but otherwise unused.
pub struct BedrockAdapter {
    client: Client,
}

impl BedrockAdapter {
    #[must_use]
    pub async fn from_ambient_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: Client::new(&config),
        }
    }

    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn map_stop_reason(reason: &StopReason) -> &'static str {
    match reason {
        StopReason::MaxTokens => "length",
        StopReason::ContentFiltered | StopReason::Guardrail => "content_filter",
        _ => "stop",
    }
}

fn to_bedrock_messages(request: &ChatRequest) -> Result<Vec<BedrockMessage>, ProviderError> {
    request
        .non_system_messages()
        .into_iter()
        .map(|m| {
            let role = match m.role.as_str() {
                "assistant" => ConversationRole::Assistant,
                _ => ConversationRole::User,
            };
            BedrockMessage::builder()
                .role(role)
                .content(ContentBlock::Text(m.content.clone()))
                .build()
                .map_err(|e| ProviderError::Configuration(e.to_string()))
        })
        .collect()
}

fn extract_text(message: &BedrockMessage) -> String {
    message
        .content()
        .iter()
        .filter_map(|block| block.as_text().ok())
        .cloned()
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        _credential: &SecretString,
        _base_url: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let messages = to_bedrock_messages(request)?;
        let mut builder = self
            .client
            .converse()
            .model_id(&request.model)
            .set_messages(Some(messages));
        if let Some(system) = request.system_prompt() {
            builder = builder.system(aws_sdk_bedrockruntime::types::SystemContentBlock::Text(
                system.to_owned(),
            ));
        }
        let output = builder
            .send()
            .await
            .map_err(|e| ProviderError::ExecutionFailed(e.to_string()))?;

        let converse_output = output
            .output
            .ok_or_else(|| ProviderError::Serialization("bedrock response had no output".into()))?;
        let assistant_message = converse_output
            .as_message()
            .map_err(|_| ProviderError::Serialization("bedrock output was not a message".into()))?;
        let content = extract_text(assistant_message);

        let usage = output
            .usage
            .ok_or_else(|| ProviderError::Serialization("bedrock response had no usage".into()))?;
        let stop_reason = output
            .stop_reason
            .as_ref()
            .map_or("stop", |r| map_stop_reason(r));

        Ok(ChatResponse {
            id: uuid::Uuid::new_v4().to_string(),
            model: request.model.clone(),
            content,
            input_tokens: u64::from(usage.input_tokens.max(0).unsigned_abs()),
            output_tokens: u64::from(usage.output_tokens.max(0).unsigned_abs()),
            finish_reason: stop_reason.to_owned(),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        // Bedrock's ConverseStream API requires consuming an event receiver
        // across `.await` points with a lifetime tied to the response; the
        // non-streaming Converse call is used and replayed as a single
        // chunk so callers still see a well-formed OpenAI chunk sequence.
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
        _base_url: Option<&str>,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let mut data = Vec::with_capacity(request.input.len());
        let mut prompt_tokens = 0u64;
        for (index, text) in request.input.iter().enumerate() {
            let payload = serde_json::json!({"inputText": text});
            let body = aws_smithy_types::Blob::new(
                serde_json::to_vec(&payload)
                    .map_err(|e| ProviderError::Serialization(e.to_string()))?,
            );
            let output = self
                .client
                .invoke_model()
                .model_id(&request.model)
                .content_type("application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| ProviderError::ExecutionFailed(e.to_string()))?;
            let parsed: serde_json::Value = serde_json::from_slice(output.body.as_ref())
                .map_err(|e| ProviderError::Serialization(e.to_string()))?;
            let embedding = parsed
                .get("embedding")
                .and_then(|v| v.as_array())
                .ok_or_else(|| ProviderError::Serialization("titan response missing embedding".into()))?
                .iter()
                .filter_map(serde_json::Value::as_f64)
                .map(|v| v as f32)
                .collect();
            prompt_tokens += text.split_whitespace().count() as u64;
            data.push(EmbeddingDatum {
                embedding,
                index: index as u32,
            });
        }
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
