use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::llm::{GenerationParams, ProviderConfig, ProviderFactory, DIALOGPT_EOS_TOKEN_ID};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generation backend: dialogpt, ollama or echo
    pub provider: String,

    /// Model to use
    pub model: String,

    /// Base URL for HTTP backends
    pub base_url: Option<String>,

    /// Request timeout for HTTP backends
    pub timeout_seconds: u64,

    /// Token that terminates every turn in the model context
    pub eos_token_id: i64,

    /// Default decoding settings
    pub generation: GenerationParams,

    /// Backend-specific options passed through untouched
    pub extra_options: HashMap<String, serde_json::Value>,

    /// Address the web server binds to
    pub host: String,

    /// Port the web server listens on
    pub port: u16,

    /// Idle time after which a browser session is forgotten
    pub session_ttl_secs: u64,

    /// Longest accepted user message, in characters
    pub max_message_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "dialogpt".to_string(),
            model: "microsoft/DialoGPT-medium".to_string(),
            base_url: None,
            timeout_seconds: 300,
            eos_token_id: DIALOGPT_EOS_TOKEN_ID,
            generation: GenerationParams::default(),
            extra_options: HashMap::new(),
            host: "127.0.0.1".to_string(),
            port: 8501,
            session_ttl_secs: 3600,
            max_message_chars: 2000,
        }
    }
}

impl Config {
    /// Initialize configuration: defaults, then a config file, then
    /// `CHATBOT_*` environment variables.
    pub async fn init(explicit_path: Option<&Path>) -> Result<Self> {
        debug!("Initializing configuration");

        let mut config = match explicit_path {
            Some(path) => Self::load_from_path(path).await?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_path(&path).await?,
                None => Self::default(),
            },
        };

        config.load_from_env();
        Ok(config)
    }

    /// Candidate configuration files, in priority order
    pub fn config_paths() -> Vec<PathBuf> {
        let mut config_paths = vec![
            PathBuf::from("./.chatbot.json"),
            PathBuf::from("./chatbot.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            config_paths.push(config_dir.join("chatbot").join("chatbot.json"));
        }

        config_paths
    }

    fn find_config_file() -> Option<PathBuf> {
        Self::config_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration from a JSON file. Missing keys keep their defaults.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an environment lookup. Values that fail to
    /// parse are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("CHATBOT_PROVIDER") {
            self.provider = provider;
        }

        if let Some(model) = lookup("CHATBOT_MODEL") {
            self.model = model;
        }

        if let Some(base_url) = lookup("CHATBOT_BASE_URL") {
            self.base_url = Some(base_url);
        } else if self.provider == "ollama" && self.base_url.is_none() {
            if let Some(url) = lookup("OLLAMA_HOST") {
                self.base_url = Some(url);
            }
        }

        if let Some(host) = lookup("CHATBOT_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("CHATBOT_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }

        if let Some(max_length) = lookup("CHATBOT_MAX_LENGTH").and_then(|v| v.parse().ok()) {
            self.generation.max_length = max_length;
        }

        if let Some(num_beams) = lookup("CHATBOT_NUM_BEAMS").and_then(|v| v.parse().ok()) {
            self.generation.num_beams = num_beams;
        }

        if let Some(temperature) = lookup("CHATBOT_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.generation.temperature = temperature;
        }

        if let Some(do_sample) = lookup("CHATBOT_DO_SAMPLE") {
            self.generation.do_sample = do_sample.to_lowercase() == "true";
        }

        if let Some(seed) = lookup("CHATBOT_SEED").and_then(|v| v.parse().ok()) {
            self.generation.seed = Some(seed);
        }

        if let Some(ttl) = lookup("CHATBOT_SESSION_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.session_ttl_secs = ttl;
        }
    }

    /// Socket address for the web server. Host names are resolved and the
    /// first address returned is used.
    pub async fn bind_addr(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address found for {}:{}", self.host, self.port))
    }

    /// Backend configuration derived from this config
    pub fn provider_config(&self) -> ProviderConfig {
        let mut extra_options = self.extra_options.clone();
        extra_options
            .entry("do_sample".to_string())
            .or_insert(serde_json::Value::Bool(self.generation.do_sample));

        ProviderConfig {
            provider_type: self.provider.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            timeout_seconds: self.timeout_seconds,
            eos_token_id: self.eos_token_id,
            extra_options,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !ProviderFactory::available_providers().contains(&self.provider.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown provider '{}'. Available: {}",
                self.provider,
                ProviderFactory::available_providers().join(", ")
            ));
        }

        if self.model.is_empty() {
            return Err(anyhow::anyhow!("Model is required"));
        }

        self.generation
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid generation settings: {}", e))?;

        if self.max_message_chars == 0 {
            return Err(anyhow::anyhow!("max_message_chars must be greater than 0"));
        }

        if self.session_ttl_secs == 0 {
            return Err(anyhow::anyhow!("session_ttl_secs must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider, "dialogpt");
        assert_eq!(config.generation.max_length, 1000);
        assert_eq!(config.port, 8501);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("CHATBOT_PROVIDER", "echo"),
            ("CHATBOT_PORT", "9000"),
            ("CHATBOT_MAX_LENGTH", "500"),
            ("CHATBOT_DO_SAMPLE", "FALSE"),
            ("CHATBOT_SEED", "11"),
            ("CHATBOT_NUM_BEAMS", "not-a-number"),
        ]));

        assert_eq!(config.provider, "echo");
        assert_eq!(config.port, 9000);
        assert_eq!(config.generation.max_length, 500);
        assert!(!config.generation.do_sample);
        assert_eq!(config.generation.seed, Some(11));
        assert_eq!(config.generation.num_beams, 3);
    }

    #[test]
    fn test_ollama_host_fallback() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("CHATBOT_PROVIDER", "ollama"),
            ("OLLAMA_HOST", "http://gpu-box:11434"),
        ]));
        assert_eq!(config.base_url.as_deref(), Some("http://gpu-box:11434"));

        let mut config = Config::default();
        config.apply_env(env(&[("OLLAMA_HOST", "http://gpu-box:11434")]));
        assert_eq!(config.base_url, None);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"provider": "echo", "generation": {{"max_length": 300}}}}"#).unwrap();

        let config = Config::load_from_path(file.path()).await.unwrap();
        assert_eq!(config.provider, "echo");
        assert_eq!(config.generation.max_length, 300);
        assert_eq!(config.generation.num_beams, 3);
        assert_eq!(config.port, 8501);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(Config::load_from_path(file.path()).await.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.provider = "gpt-j".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.max_length = 50;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.model.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_config_carries_sampling_flag() {
        let mut config = Config::default();
        config.generation.do_sample = false;
        let provider_config = config.provider_config();
        assert_eq!(provider_config.extra_options["do_sample"], serde_json::Value::Bool(false));
        assert_eq!(provider_config.eos_token_id, DIALOGPT_EOS_TOKEN_ID);
    }

    #[tokio::test]
    async fn test_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().await.unwrap();
        assert_eq!(addr.port(), 8501);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_addr_resolves_host_names() {
        let mut config = Config::default();
        config.host = "localhost".to_string();
        config.port = 9000;
        let addr = config.bind_addr().await.unwrap();
        assert_eq!(addr.port(), 9000);
        assert!(addr.ip().is_loopback());
    }
}
