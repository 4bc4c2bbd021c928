mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::{ChatModel, Message};
use client::OpenAiClient;
use types::ChatRequest;

// =============================================================================
// OpenAi Agent
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }
}

#[async_trait]
impl ChatModel for OpenAi {
    /// A response with no choices or empty content yields an empty string:
    /// "no candidates", not an error.
    async fn chat(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest::new(&self.model, messages, temperature, max_tokens);
        let response = self.client().chat(&request).await?;
        Ok(response.text().unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
