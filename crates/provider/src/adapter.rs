use async_trait::async_trait;
use futures::stream::BoxStream;
use secrecy::SecretString;
use warden_core::ProviderKind;

use crate::error::ProviderError;
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, StreamChunk};

/// Translates a canonical chat/embeddings request to one upstream provider's
/// wire format and back. One adapter instance is shared across every
/// request that resolves to its `kind`; adapters must be `Send + Sync` and
/// hold no per-request state.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// `credential` is the upstream key to present, already decrypted.
    /// `base_url` overrides the adapter's default endpoint when the model's
    /// route specifies one (e.g. a self-hosted OpenAI-wire server).
    async fn chat(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<ChatResponse, ProviderError>;

    /// Stream chat deltas in OpenAI streaming chunk shape, regardless of the
    /// upstream's native streaming protocol.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError>;

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        credential: &SecretString,
        base_url: Option<&str>,
    ) -> Result<EmbeddingResponse, ProviderError>;
}
