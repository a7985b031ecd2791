pub mod adapter;
pub mod adapters;
pub mod error;
pub mod registry;
pub mod trace_context;
pub mod types;

pub use adapter::ProviderAdapter;
pub use adapters::{AnthropicAdapter, BedrockAdapter, MockAdapter, OpenAiCompatibleAdapter, VertexAdapter};
pub use error::ProviderError;
pub use registry::AdapterRegistry;
pub use trace_context::inject_trace_context;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingDatum, EmbeddingRequest, EmbeddingResponse,
    EmbeddingUsage, StreamChoice, StreamChunk, StreamDelta,
};
