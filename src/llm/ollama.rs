use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::{debug, warn};

use super::{
    errors::{LlmError, LlmResult},
    provider::{utils::extract_error_message, LlmProvider},
    types::{GenerationParams, GenerationRequest, GenerationResponse, ModelContext, ProviderConfig, TokenUsage},
};

/// Ollama API configuration
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    default_model: String,
    extra_options: HashMap<String, serde_json::Value>,
}

/// Ollama generate request. `context` carries the token history returned by
/// the previous call.
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Vec<i64>>,
    options: serde_json::Map<String, serde_json::Value>,
}

/// Ollama response format for generate
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    done: bool,
    #[serde(default)]
    context: Option<Vec<i64>>,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama models list response
#[derive(Debug, Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider from configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let base_url = config
            .base_url
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            default_model: config.model,
            extra_options: config.extra_options,
        })
    }

    /// Get available models from Ollama
    pub async fn list_models(&self) -> LlmResult<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        debug!("Fetching Ollama models from: {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError(format!(
                "Failed to fetch models: {}",
                response.status()
            )));
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names = models_response.models.into_iter().map(|m| m.name).collect();

        debug!("Available Ollama models: {:?}", model_names);
        Ok(model_names)
    }

    /// Map decoding settings onto Ollama `options`. Beam search and n-gram
    /// blocking have no Ollama equivalent.
    fn build_options(&self, params: &GenerationParams, num_predict: usize) -> serde_json::Map<String, serde_json::Value> {
        let mut options = serde_json::Map::new();
        for (key, value) in &self.extra_options {
            if key != "do_sample" {
                options.insert(key.clone(), value.clone());
            }
        }

        options.insert("num_predict".to_string(), serde_json::json!(num_predict));
        if params.do_sample {
            options.insert("temperature".to_string(), serde_json::json!(params.temperature));
        } else {
            options.insert("temperature".to_string(), serde_json::json!(0.0));
        }
        if let Some(top_p) = params.top_p {
            options.insert("top_p".to_string(), serde_json::json!(top_p));
        }
        if let Some(top_k) = params.top_k {
            options.insert("top_k".to_string(), serde_json::json!(top_k));
        }
        if let Some(seed) = params.seed {
            options.insert("seed".to_string(), serde_json::json!(seed));
        }
        if params.num_beams > 1 || params.no_repeat_ngram_size > 0 {
            debug!("Ollama ignores num_beams and no_repeat_ngram_size");
        }
        options
    }
}

/// Ollama contexts are in the served model's own vocabulary and carry no
/// turn separators, so a history that leaves no room for the reply is
/// dropped as a whole.
fn fit_ollama_context(prior: Option<&ModelContext>, max_length: usize) -> Option<ModelContext> {
    let prior = prior?;
    if !prior.is_empty() && prior.len() + 1 < max_length {
        Some(prior.clone())
    } else {
        if !prior.is_empty() {
            debug!("Dropping {} token Ollama context over max_length {}", prior.len(), max_length);
        }
        None
    }
}

fn map_request_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::TimeoutError(error.to_string())
    } else {
        LlmError::HttpError(error)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        let url = format!("{}/api/generate", self.base_url);
        let max_length = request.params.max_length;

        let prior = fit_ollama_context(request.context.as_ref(), max_length);
        let prior_len = prior.as_ref().map_or(0, ModelContext::len);
        let num_predict = max_length.saturating_sub(prior_len).max(1);

        debug!(
            "Sending Ollama generate request to: {} (context={} tokens)",
            url, prior_len
        );

        let ollama_request = OllamaGenerateRequest {
            model: self.default_model.clone(),
            prompt: request.user_input.clone(),
            stream: false,
            context: prior.clone().map(ModelContext::into_tokens),
            options: self.build_options(&request.params, num_predict),
        };

        let response = self
            .client
            .post(&url)
            .json(&ollama_request)
            .send()
            .await
            .map_err(map_request_error)?;

        if !response.status().is_success() {
            let message = extract_error_message(response).await;
            return Err(LlmError::ApiError(format!("Ollama API error {}", message)));
        }

        let ollama_response: OllamaGenerateResponse = response.json().await?;
        if !ollama_response.done {
            warn!("Ollama returned an unfinished response");
        }

        let context = match ollama_response.context {
            Some(tokens) => ModelContext::new(tokens),
            None => prior.unwrap_or_default(),
        };

        let mut metadata = HashMap::new();
        if let Some(total_duration) = ollama_response.total_duration {
            metadata.insert("total_duration_ns".to_string(), serde_json::json!(total_duration));
        }
        metadata.insert("model".to_string(), serde_json::Value::String(self.default_model.clone()));
        metadata.insert("provider".to_string(), serde_json::Value::String("ollama".to_string()));

        let usage = TokenUsage::new(
            ollama_response.prompt_eval_count.unwrap_or(0),
            ollama_response.eval_count.unwrap_or(0),
        );

        Ok(GenerationResponse {
            reply: ollama_response.response.trim().to_string(),
            context,
            usage,
            metadata,
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.default_model
    }

    fn validate_config(&self) -> LlmResult<()> {
        if self.default_model.is_empty() {
            return Err(LlmError::ConfigError("Ollama model name is required".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(LlmError::ConfigError(format!(
                "Invalid Ollama base URL: {}",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Ready when the server answers and the configured model is pulled
    async fn health_check(&self) -> LlmResult<bool> {
        match self.list_models().await {
            Ok(models) => {
                let found = models.iter().any(|name| {
                    name == &self.default_model
                        || name.split(':').next() == Some(self.default_model.as_str())
                });
                if !found {
                    debug!("Model {} is not pulled on {}", self.default_model, self.base_url);
                }
                Ok(found)
            }
            Err(e) => {
                debug!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str, base_url: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            provider_type: "ollama".to_string(),
            model: model.to_string(),
            base_url: base_url.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_ollama_provider_creation() {
        let provider = OllamaProvider::new(config("llama2", None)).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.default_model, "llama2");
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "llama2");
        assert!(provider.validate_config().is_ok());
    }

    #[test]
    fn test_ollama_provider_custom_url() {
        let provider = OllamaProvider::new(config("mistral", Some("http://custom-ollama:8080/"))).unwrap();
        assert_eq!(provider.base_url, "http://custom-ollama:8080");
    }

    #[test]
    fn test_invalid_base_url_fails_validation() {
        let provider = OllamaProvider::new(config("mistral", Some("custom-ollama:8080"))).unwrap();
        assert!(matches!(provider.validate_config(), Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_request_carries_context_and_options() {
        let provider = OllamaProvider::new(config("llama2", None)).unwrap();
        let params = GenerationParams {
            seed: Some(7),
            top_p: Some(0.9),
            ..Default::default()
        };
        let request = OllamaGenerateRequest {
            model: "llama2".to_string(),
            prompt: "hello".to_string(),
            stream: false,
            context: Some(vec![1, 2, 3]),
            options: provider.build_options(&params, 250),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["context"], serde_json::json!([1, 2, 3]));
        assert_eq!(json["options"]["num_predict"], 250);
        assert_eq!(json["options"]["seed"], 7);
        assert_eq!(json["options"]["top_p"], 0.9);
        assert!(json["options"].get("top_k").is_none());
    }

    #[test]
    fn test_greedy_decoding_zeroes_temperature() {
        let provider = OllamaProvider::new(config("llama2", None)).unwrap();
        let params = GenerationParams {
            do_sample: false,
            ..Default::default()
        };
        let options = provider.build_options(&params, 10);
        assert_eq!(options["temperature"], 0.0);
    }

    #[test]
    fn test_response_without_context_parses() {
        let body = r#"{"response":" Hi there ","done":true,"eval_count":3}"#;
        let parsed: OllamaGenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.response, " Hi there ");
        assert!(parsed.context.is_none());
        assert_eq!(parsed.eval_count, Some(3));
    }

    #[test]
    fn test_long_context_is_dropped_whole() {
        let mut tokens: Vec<i64> = (1000..1100).collect();
        tokens[60] = 50256;
        let prior = ModelContext::new(tokens);

        assert_eq!(fit_ollama_context(Some(&prior), 100), None);
        assert_eq!(fit_ollama_context(Some(&prior), 101), None);
        assert_eq!(fit_ollama_context(Some(&prior), 102), Some(prior.clone()));
        assert_eq!(fit_ollama_context(None, 1000), None);
    }

    /// Serves a fake `/api/generate`: `fail` answers 500, `forget` answers
    /// without a context, `slow` stalls, anything else appends [7, 8] to the
    /// context it was sent.
    async fn stub_ollama() -> String {
        use axum::{http::StatusCode, routing::post, Json, Router};
        use serde_json::{json, Value};

        async fn generate(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            match body["prompt"].as_str().unwrap_or_default() {
                "fail" => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "model 'llama2' not found" })),
                ),
                "forget" => (StatusCode::OK, Json(json!({ "response": "ok", "done": true }))),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    (StatusCode::OK, Json(json!({ "response": "late", "done": true })))
                }
                prompt => {
                    let mut context: Vec<i64> = body["context"]
                        .as_array()
                        .map(|tokens| tokens.iter().filter_map(Value::as_i64).collect())
                        .unwrap_or_default();
                    context.extend([7, 8]);
                    (
                        StatusCode::OK,
                        Json(json!({
                            "response": format!(" re: {} ", prompt),
                            "done": true,
                            "context": context,
                            "prompt_eval_count": 4,
                            "eval_count": 2,
                        })),
                    )
                }
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/api/generate", post(generate));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn stub_provider(base_url: &str) -> OllamaProvider {
        OllamaProvider::new(ProviderConfig {
            timeout_seconds: 1,
            ..config("llama2", Some(base_url))
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_carries_returned_context() {
        let provider = stub_provider(&stub_ollama().await);

        let first = provider
            .generate(GenerationRequest::new("hello", None, GenerationParams::default()))
            .await
            .unwrap();
        assert_eq!(first.reply, "re: hello");
        assert_eq!(first.context.tokens(), &[7, 8]);
        assert_eq!(first.usage, TokenUsage::new(4, 2));

        let second = provider
            .generate(GenerationRequest::new(
                "again",
                Some(first.context.clone()),
                GenerationParams::default(),
            ))
            .await
            .unwrap();
        assert_eq!(second.context.tokens(), &[7, 8, 7, 8]);
    }

    #[tokio::test]
    async fn test_missing_context_keeps_prior() {
        let provider = stub_provider(&stub_ollama().await);
        let prior = ModelContext::new(vec![1, 2, 3]);

        let response = provider
            .generate(GenerationRequest::new("forget", Some(prior.clone()), GenerationParams::default()))
            .await
            .unwrap();
        assert_eq!(response.reply, "ok");
        assert_eq!(response.context, prior);
    }

    #[tokio::test]
    async fn test_server_error_becomes_api_error() {
        let provider = stub_provider(&stub_ollama().await);

        let err = provider
            .generate(GenerationRequest::new("fail", None, GenerationParams::default()))
            .await
            .unwrap_err();
        match err {
            LlmError::ApiError(message) => {
                assert!(message.contains("500"));
                assert!(message.contains("model 'llama2' not found"));
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let provider = stub_provider(&stub_ollama().await);

        let err = provider
            .generate(GenerationRequest::new("slow", None, GenerationParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::TimeoutError(_)));
    }
}
