use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrantSignalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Daily request quota exhausted")]
    QuotaExceeded,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
