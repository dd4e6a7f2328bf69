//! Provider trait and factory for generation backends

use async_trait::async_trait;
use tracing::info;

use crate::llm::{
    echo::EchoProvider,
    errors::{LlmError, LlmResult},
    ollama::OllamaProvider,
    types::{GenerationRequest, GenerationResponse, ProviderConfig},
};

/// A loaded dialogue model that turns a user utterance plus the running
/// token history into a reply.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one generation step
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse>;

    /// Get the provider name
    fn name(&self) -> &str;

    /// Get the model name
    fn model(&self) -> &str;

    /// Validate the configuration
    fn validate_config(&self) -> LlmResult<()>;

    /// Whether the backend is ready to serve requests
    async fn health_check(&self) -> LlmResult<bool> {
        Ok(true)
    }
}

/// Factory for creating generation backends
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a new provider from configuration
    pub fn create_provider(config: ProviderConfig) -> LlmResult<Box<dyn LlmProvider>> {
        info!(
            "Creating {} provider for model {}",
            config.provider_type, config.model
        );
        match config.provider_type.as_str() {
            "dialogpt" => Self::create_dialogpt(config),
            "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
            "echo" => Ok(Box::new(EchoProvider::new(config)?)),
            _ => Err(LlmError::ConfigError(format!(
                "Unsupported provider type: {}",
                config.provider_type
            ))),
        }
    }

    #[cfg(feature = "local-model")]
    fn create_dialogpt(config: ProviderConfig) -> LlmResult<Box<dyn LlmProvider>> {
        let provider = crate::llm::dialogpt::DialoGptProvider::new(config)?;
        Ok(Box::new(provider))
    }

    #[cfg(not(feature = "local-model"))]
    fn create_dialogpt(_config: ProviderConfig) -> LlmResult<Box<dyn LlmProvider>> {
        tracing::warn!("dialogpt provider requested but the local-model feature is disabled");
        Err(LlmError::ModelLoad(
            "the dialogpt backend requires building with the `local-model` feature".to_string(),
        ))
    }

    /// Get available provider types
    pub fn available_providers() -> Vec<&'static str> {
        vec!["dialogpt", "ollama", "echo"]
    }
}

/// Stand-in used when the configured model could not be loaded.
///
/// The server keeps running and every generation attempt reports the
/// load failure.
pub struct UnavailableProvider {
    provider_type: String,
    model: String,
    reason: String,
}

impl UnavailableProvider {
    pub fn new(config: &ProviderConfig, reason: impl Into<String>) -> Self {
        Self {
            provider_type: config.provider_type.clone(),
            model: config.model.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for UnavailableProvider {
    async fn generate(&self, _request: GenerationRequest) -> LlmResult<GenerationResponse> {
        Err(LlmError::ModelLoad(self.reason.clone()))
    }

    fn name(&self) -> &str {
        &self.provider_type
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> LlmResult<()> {
        Err(LlmError::ModelLoad(self.reason.clone()))
    }

    async fn health_check(&self) -> LlmResult<bool> {
        Ok(false)
    }
}

/// Utility functions for provider implementations
pub mod utils {
    use crate::llm::types::ModelContext;

    /// Prior context trimmed so that `prior ++ user_turn` leaves at least one
    /// token of room for the reply within `max_length`.
    ///
    /// `user_turn_len` includes the trailing EOS. Returns `None` when nothing
    /// of the prior context fits.
    pub fn fit_prior_context(
        prior: Option<&ModelContext>,
        user_turn_len: usize,
        max_length: usize,
        eos: i64,
    ) -> Option<ModelContext> {
        let prior = prior?;
        let budget = max_length.saturating_sub(user_turn_len + 1);
        let trimmed = prior.trimmed_to(budget, eos);
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Sanitize content for safe display
    pub fn sanitize_content(content: &str) -> String {
        content
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect()
    }

    /// Extract error message from HTTP response
    pub async fn extract_error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.text().await {
            Ok(text) => {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                    if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
                        return format!("{}: {}", status, error);
                    }
                }
                format!("{}: {}", status, text)
            }
            Err(_) => format!("{}: Failed to read error response", status),
        }
    }
}
