//! Offline backend that answers without a neural model.
//!
//! Text is tokenized byte-wise and the context is assembled exactly the way
//! DialoGPT assembles it, so everything around the model can be exercised
//! without downloading weights.

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

use super::{
    errors::{LlmError, LlmResult},
    provider::{utils::fit_prior_context, LlmProvider},
    types::{GenerationRequest, GenerationResponse, ProviderConfig, TokenUsage},
};

const TEMPLATES: &[&str] = &[
    "You said: {input}",
    "Tell me more about \"{input}\".",
    "Interesting! Why do you say \"{input}\"?",
    "I hear you. \"{input}\" is worth thinking about.",
];

#[derive(Debug, Clone)]
pub struct EchoProvider {
    model: String,
    eos_token_id: i64,
}

impl EchoProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        Ok(Self {
            model: config.model,
            eos_token_id: config.eos_token_id,
        })
    }

    fn encode(text: &str) -> Vec<i64> {
        text.bytes().map(i64::from).collect()
    }

    fn decode(&self, tokens: &[i64]) -> String {
        let bytes: Vec<u8> = tokens
            .iter()
            .filter(|&&t| t != self.eos_token_id)
            .filter_map(|&t| u8::try_from(t).ok())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn compose_reply(request: &GenerationRequest) -> String {
        let input = request.user_input.trim();
        let template = if request.params.do_sample {
            let mut rng = match request.params.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            TEMPLATES[rng.gen_range(0..TEMPLATES.len())]
        } else {
            TEMPLATES[0]
        };
        template.replace("{input}", input)
    }
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a char.
fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        let eos = self.eos_token_id;
        let max_length = request.params.max_length;

        let user_turn_len = request.user_input.len() + 1;
        let prior = fit_prior_context(request.context.as_ref(), user_turn_len, max_length, eos);

        let mut bot_input = prior.unwrap_or_default();
        bot_input.push_turn(&Self::encode(&request.user_input), eos);
        if bot_input.len() >= max_length {
            return Err(LlmError::Generation(format!(
                "input of {} tokens leaves no room within max_length {}",
                bot_input.len(),
                max_length
            )));
        }

        // One token of the remaining room is kept for the closing EOS.
        let room = max_length - bot_input.len() - 1;
        let full_reply = Self::compose_reply(&request);
        let reply_text = truncate_at_char_boundary(&full_reply, room);
        let reply_tokens = Self::encode(reply_text);

        debug!(
            "echo: bot_input={} tokens, reply={} tokens",
            bot_input.len(),
            reply_tokens.len()
        );

        let input_tokens = bot_input.len() as u32;
        let mut context = bot_input;
        context.push_turn(&reply_tokens, eos);
        debug!("echo: context holds {} turns", context.turn_count(eos));

        let mut metadata = HashMap::new();
        metadata.insert("provider".to_string(), serde_json::Value::String("echo".to_string()));
        metadata.insert("model".to_string(), serde_json::Value::String(self.model.clone()));

        Ok(GenerationResponse {
            reply: self.decode(&reply_tokens),
            context,
            usage: TokenUsage::new(input_tokens, reply_tokens.len() as u32 + 1),
            metadata,
        })
    }

    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> LlmResult<()> {
        if self.eos_token_id <= u8::MAX as i64 {
            return Err(LlmError::ConfigError(
                "echo provider needs an EOS token outside the byte range".to_string(),
            ));
        }
        Ok(())
    }
}
