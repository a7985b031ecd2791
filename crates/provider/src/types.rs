use serde::{Deserialize, Serialize};

/// One message in a canonical chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Provider-agnostic chat request every adapter translates to its own wire
/// format and back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// The first `system`-role message, if any, separated from the rest so
    /// adapters that model system prompts out-of-band (Anthropic, Vertex)
    /// don't have to scan `messages` themselves.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
    }

    #[must_use]
    pub fn non_system_messages(&self) -> Vec<&ChatMessage> {
        self.messages.iter().filter(|m| m.role != "system").collect()
    }
}

/// Canonical chat response, already converted back from the upstream's wire
/// format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: String,
}

/// One incremental delta in the OpenAI streaming chunk shape. Every adapter
/// produces this shape regardless of the upstream's native streaming
/// protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: StreamDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

impl StreamChunk {
    #[must_use]
    pub fn delta(id: &str, model: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_owned(),
            model: model.to_owned(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta {
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
        }
    }

    #[must_use]
    pub fn done(id: &str, model: &str, finish_reason: impl Into<String>) -> Self {
        Self {
            id: id.to_owned(),
            model: model.to_owned(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta { content: None },
                finish_reason: Some(finish_reason.into()),
            }],
        }
    }
}

/// Canonical embeddings request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingDatum {
    pub embedding: Vec<f32>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingDatum>,
    pub model: String,
    pub usage: EmbeddingUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_extracted_and_excluded_from_rest() {
        let req = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![
                ChatMessage { role: "system".into(), content: "be terse".into() },
                ChatMessage { role: "user".into(), content: "hi".into() },
            ],
            max_tokens: None,
            temperature: None,
            stream: false,
        };
        assert_eq!(req.system_prompt(), Some("be terse"));
        assert_eq!(req.non_system_messages().len(), 1);
    }
}
