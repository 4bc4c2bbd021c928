use std::env;

use tracing::info;

/// Secrets and provider settings loaded from environment variables.
/// Rule tables live in the TOML config (see `rules`), not here.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub model: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: required_env("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            model: env::var("GRANTSIGNAL_MODEL").unwrap_or_else(|_| "o4-mini".to_string()),
        }
    }

    pub fn log_redacted(&self) {
        info!(
            model = self.model.as_str(),
            base_url = self.openai_base_url.as_deref().unwrap_or("default"),
            api_key_set = !self.openai_api_key.is_empty(),
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
