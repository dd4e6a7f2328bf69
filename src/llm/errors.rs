//! Error types for generation backends

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model is unavailable: {0}")]
    Unavailable(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),
}

impl LlmError {
    /// Whether the model itself cannot serve requests, as opposed to a
    /// single generation call going wrong.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LlmError::ModelLoad(_) | LlmError::Unavailable(_))
    }
}

pub type LlmResult<T> = Result<T, LlmError>;
