//! Deterministic test doubles: no network, no provider keys.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use ai_client::{ChatModel, Message};

/// Scripted chat model. Rules are checked in order: failure triggers, then
/// prompt-keyed replies, then the default reply. `fail_first` makes the
/// first N calls fail regardless of prompt, for retry-path tests.
pub struct MockModel {
    default_reply: String,
    keyed_replies: Vec<(String, String)>,
    failures: Vec<(String, String)>,
    fail_first: Mutex<(u32, String)>,
    calls: AtomicU32,
}

impl MockModel {
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            default_reply: reply.into(),
            keyed_replies: Vec::new(),
            failures: Vec::new(),
            fail_first: Mutex::new((0, String::new())),
            calls: AtomicU32::new(0),
        }
    }

    /// Prompts containing `needle` get `reply` instead of the default.
    pub fn reply_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.keyed_replies.push((needle.into(), reply.into()));
        self
    }

    /// Prompts containing `needle` fail with `error`.
    pub fn fail_when(mut self, needle: impl Into<String>, error: impl Into<String>) -> Self {
        self.failures.push((needle.into(), error.into()));
        self
    }

    /// The first `n` calls fail with `error`, whatever the prompt.
    pub fn fail_first(self, n: u32, error: impl Into<String>) -> Self {
        *self.fail_first.lock().expect("mock mutex poisoned") = (n, error.into());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn chat(
        &self,
        messages: &[Message],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        {
            let mut fail = self.fail_first.lock().expect("mock mutex poisoned");
            if fail.0 > 0 {
                fail.0 -= 1;
                return Err(anyhow!("{}", fail.1));
            }
        }

        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        for (needle, error) in &self.failures {
            if prompt.contains(needle.as_str()) {
                return Err(anyhow!("{error}"));
            }
        }

        for (needle, reply) in &self.keyed_replies {
            if prompt.contains(needle.as_str()) {
                return Ok(reply.clone());
            }
        }

        Ok(self.default_reply.clone())
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
