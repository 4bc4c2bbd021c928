use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// =============================================================================
// ChatModel Trait
// =============================================================================

/// Provider-agnostic chat-completion seam. Callers send a message exchange and
/// get back the assistant's reply text. An empty reply is a valid outcome
/// (the model produced no usable content), not an error.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[Message], temperature: f32, max_tokens: u32)
        -> Result<String>;

    /// Model identifier, for logging and result metadata.
    fn model_name(&self) -> &str;
}
