//! Common types for generation backends

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// End-of-sequence token of the GPT-2 vocabulary DialoGPT is trained on.
/// Every turn in a DialoGPT context is terminated by it.
pub const DIALOGPT_EOS_TOKEN_ID: i64 = 50256;

/// Lower and upper bounds accepted for `max_length`.
pub const MIN_MAX_LENGTH: usize = 100;
pub const MAX_MAX_LENGTH: usize = 2000;

/// The running token history fed back to the model on every turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelContext {
    tokens: Vec<i64>,
}

impl ModelContext {
    pub fn new(tokens: Vec<i64>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[i64] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<i64> {
        self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Append one turn, terminated by `eos`.
    pub fn push_turn(&mut self, turn: &[i64], eos: i64) {
        self.tokens.extend_from_slice(turn);
        self.tokens.push(eos);
    }

    /// Number of EOS-terminated turns.
    pub fn turn_count(&self, eos: i64) -> usize {
        self.tokens.iter().filter(|&&t| t == eos).count()
    }

    /// Drop the oldest whole turns until at most `budget` tokens remain.
    ///
    /// Cuts only happen right after an EOS token, so a turn is either kept
    /// entirely or dropped entirely. The result may be empty.
    pub fn trimmed_to(&self, budget: usize, eos: i64) -> ModelContext {
        let len = self.tokens.len();
        if len <= budget {
            return self.clone();
        }

        let start = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == eos)
            .map(|(i, _)| i + 1)
            .find(|&boundary| len - boundary <= budget)
            .unwrap_or(len);

        ModelContext::new(self.tokens[start..].to_vec())
    }
}

/// Decoding settings passed to the model's `generate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Total length budget of the generated sequence, history included.
    pub max_length: usize,
    pub num_beams: usize,
    pub no_repeat_ngram_size: usize,
    pub temperature: f64,
    pub do_sample: bool,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    /// Fixed seed for reproducible sampling.
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 1000,
            num_beams: 3,
            no_repeat_ngram_size: 2,
            temperature: 0.7,
            do_sample: true,
            top_p: None,
            top_k: None,
            seed: None,
        }
    }
}

impl GenerationParams {
    /// Copy of these params with `max_length` clamped into the accepted range.
    pub fn with_max_length(&self, max_length: usize) -> Self {
        Self {
            max_length: max_length.clamp(MIN_MAX_LENGTH, MAX_MAX_LENGTH),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_MAX_LENGTH..=MAX_MAX_LENGTH).contains(&self.max_length) {
            return Err(format!(
                "max_length must be between {} and {}",
                MIN_MAX_LENGTH, MAX_MAX_LENGTH
            ));
        }
        if self.num_beams == 0 {
            return Err("num_beams must be greater than 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) || self.temperature == 0.0 {
            return Err("temperature must be in (0.0, 2.0]".to_string());
        }
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err("top_p must be between 0.0 and 1.0".to_string());
            }
        }
        Ok(())
    }
}

/// A single generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_input: String,
    pub context: Option<ModelContext>,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(user_input: impl Into<String>, context: Option<ModelContext>, params: GenerationParams) -> Self {
        Self {
            user_input: user_input.into(),
            context,
            params,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Result of a generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Decoded reply with special tokens skipped
    pub reply: String,
    /// Full generated sequence: prior context, user turn and reply
    pub context: ModelContext,
    pub usage: TokenUsage,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Configuration for a generation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
    pub eos_token_id: i64,
    pub extra_options: HashMap<String, serde_json::Value>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "dialogpt".to_string(),
            model: "microsoft/DialoGPT-medium".to_string(),
            base_url: None,
            timeout_seconds: 300,
            eos_token_id: DIALOGPT_EOS_TOKEN_ID,
            extra_options: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: i64 = DIALOGPT_EOS_TOKEN_ID;

    fn three_turns() -> ModelContext {
        let mut ctx = ModelContext::default();
        ctx.push_turn(&[1, 2, 3], EOS);
        ctx.push_turn(&[4, 5], EOS);
        ctx.push_turn(&[6], EOS);
        ctx
    }

    #[test]
    fn test_push_turn_terminates_with_eos() {
        let ctx = three_turns();
        assert_eq!(ctx.tokens(), &[1, 2, 3, EOS, 4, 5, EOS, 6, EOS]);
        assert_eq!(ctx.turn_count(EOS), 3);
    }

    #[test]
    fn test_trim_keeps_context_within_budget() {
        let ctx = three_turns();
        assert_eq!(ctx.trimmed_to(100, EOS), ctx);
        assert_eq!(ctx.trimmed_to(9, EOS), ctx);
    }

    #[test]
    fn test_trim_drops_oldest_whole_turns() {
        let ctx = three_turns();
        assert_eq!(ctx.trimmed_to(8, EOS).tokens(), &[4, 5, EOS, 6, EOS]);
        assert_eq!(ctx.trimmed_to(5, EOS).tokens(), &[4, 5, EOS, 6, EOS]);
        assert_eq!(ctx.trimmed_to(4, EOS).tokens(), &[6, EOS]);
        assert!(ctx.trimmed_to(1, EOS).is_empty());
        assert!(ctx.trimmed_to(0, EOS).is_empty());
    }

    #[test]
    fn test_max_length_is_clamped() {
        let params = GenerationParams::default();
        assert_eq!(params.with_max_length(10).max_length, MIN_MAX_LENGTH);
        assert_eq!(params.with_max_length(5000).max_length, MAX_MAX_LENGTH);
        assert_eq!(params.with_max_length(640).max_length, 640);
    }

    #[test]
    fn test_default_params_match_dialogpt_settings() {
        let params = GenerationParams::default();
        assert_eq!(params.max_length, 1000);
        assert_eq!(params.num_beams, 3);
        assert_eq!(params.no_repeat_ngram_size, 2);
        assert!(params.do_sample);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let mut params = GenerationParams::default();
        params.num_beams = 0;
        assert!(params.validate().is_err());

        let mut params = GenerationParams::default();
        params.temperature = 0.0;
        assert!(params.validate().is_err());

        let mut params = GenerationParams::default();
        params.top_p = Some(1.5);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_context_serializes_as_plain_array() {
        let ctx = ModelContext::new(vec![7, 8, EOS]);
        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(json, "[7,8,50256]");
    }
}
