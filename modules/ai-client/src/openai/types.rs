use serde::{Deserialize, Serialize};

use crate::traits::{Message, MessageRole};

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(model: &str, messages: &[Message], temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WireMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// First choice's content. `None` when the response carries no choices or
    /// the content is absent — callers treat that as "no candidates".
    pub fn text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
    }
}
