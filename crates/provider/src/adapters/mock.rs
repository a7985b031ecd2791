use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use warden_core::ProviderKind;

use crate::adapter::ProviderAdapter;
use crate::error::ProviderError;
use crate::types::{
    ChatRequest, ChatResponse, EmbeddingDatum, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage,
    StreamChunk,
};

/// Deterministic adapter used in the test environment. Produces responses
/// derived purely from the request content so the same input always yields
/// the same output, with no network I/O and no dependency on wall-clock
/// time or randomness.
#[derive(Default)]
pub struct MockAdapter;

fn deterministic_id(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    format!("mock-{}", hex::encode(&digest[..8]))
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        _credential: &SecretString,
        _base_url: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map_or("", |m| m.content.as_str());
        let content = format!("mock response to: {last_user}");
        let input_tokens = request.messages.iter().map(|m| word_count(&m.content)).sum();
        Ok(ChatResponse {
            id: deterministic_id(last_user),
            model: request.model.clone(),
            output_tokens: word_count(&content),
            input_tokens,
            content,
            finish_reason: "stop".into(),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        let response = self.chat(request, credential, base_url).await?;
        let words: Vec<String> = response
            .content
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
        let id = response.id.clone();
        let model = response.model.clone();
        let finish_reason = response.finish_reason.clone();
        let deltas = words
            .into_iter()
            .map(move |word| Ok(StreamChunk::delta(&id, &model, format!("{word} "))));
        let done = std::iter::once(Ok(StreamChunk::done(
            &response.id,
            &response.model,
            finish_reason,
        )));
        Ok(stream::iter(deltas.chain(done)).boxed())
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        _credential: &SecretString,
        _base_url: Option<&str>,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let mut prompt_tokens = 0;
        let data = request
            .input
            .iter()
            .enumerate()
            .map(|(index, text)| {
                prompt_tokens += word_count(text);
                EmbeddingDatum {
                    embedding: deterministic_embedding(text),
                    index: index as u32,
                }
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

/// 16-dimensional pseudo-embedding derived from a `SHA-256` digest of the
/// input text, so equal inputs always embed to the same vector.
fn deterministic_embedding(text: &str) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .take(16)
        .map(|byte| (f32::from(*byte) / 255.0) * 2.0 - 1.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: &str) -> ChatRequest {
        ChatRequest {
            model: "mock-model".into(),
            messages: vec![crate::types::ChatMessage {
                role: "user".into(),
                content: content.into(),
            }],
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn same_input_yields_same_response() {
        let adapter = MockAdapter;
        let key = SecretString::from("k".to_owned());
        let a = adapter.chat(&request("hello there"), &key, None).await.unwrap();
        let b = adapter.chat(&request("hello there"), &key, None).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.content, b.content);
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_dimension_matches() {
        let adapter = MockAdapter;
        let key = SecretString::from("k".to_owned());
        let req = EmbeddingRequest {
            model: "mock-embed".into(),
            input: vec!["a".into(), "b".into()],
        };
        let resp = adapter.embed(&req, &key, None).await.unwrap();
        assert_eq!(resp.data.len(), 2);
        assert_eq!(resp.data[0].embedding.len(), 16);
        assert_ne!(resp.data[0].embedding, resp.data[1].embedding);
    }

    #[tokio::test]
    async fn stream_ends_with_finish_reason() {
        let adapter = MockAdapter;
        let key = SecretString::from("k".to_owned());
        let mut chunk_stream = adapter
            .chat_stream(&request("one two three"), &key, None)
            .await
            .unwrap();
        let chunks: Vec<_> = StreamExt::collect(&mut chunk_stream).await;
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
