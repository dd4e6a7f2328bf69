//! In-process DialoGPT backend built on rust-bert.
//!
//! libtorch modules are not shareable across threads, so the model lives on a
//! dedicated worker thread and requests reach it over a channel. Jobs are
//! served one at a time in arrival order.

use async_trait::async_trait;
use rust_bert::{
    gpt2::{GPT2Generator, Gpt2ConfigResources, Gpt2MergesResources, Gpt2ModelResources, Gpt2VocabResources},
    pipelines::{
        common::ModelResource,
        generation_utils::{GenerateConfig, GenerateOptions, LanguageGenerator},
    },
    resources::{LocalResource, RemoteResource, ResourceProvider},
};
use rust_tokenizers::tokenizer::{Gpt2Tokenizer, Tokenizer, TruncationStrategy};
use std::{collections::HashMap, path::PathBuf, sync::mpsc, thread, time::Instant};
use tch::{Device, Tensor};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::{
    errors::{LlmError, LlmResult},
    provider::{utils::fit_prior_context, LlmProvider},
    types::{GenerationParams, GenerationRequest, GenerationResponse, ProviderConfig, TokenUsage},
};

const DIALOGPT_MEDIUM: &str = "microsoft/DialoGPT-medium";

struct Job {
    request: GenerationRequest,
    reply: oneshot::Sender<LlmResult<GenerationResponse>>,
}

/// Where the weights, config and vocabulary come from.
#[derive(Debug, Clone)]
enum ModelSource {
    Pretrained,
    Directory(PathBuf),
}

impl ModelSource {
    fn from_model_name(model: &str) -> LlmResult<Self> {
        if model == DIALOGPT_MEDIUM {
            return Ok(ModelSource::Pretrained);
        }
        let path = PathBuf::from(model);
        if path.is_dir() {
            return Ok(ModelSource::Directory(path));
        }
        Err(LlmError::ConfigError(format!(
            "unknown DialoGPT model '{}': use {} or a directory with rust_model.ot, config.json, vocab.json and merges.txt",
            model, DIALOGPT_MEDIUM
        )))
    }

    fn resources(
        &self,
    ) -> (
        Box<dyn ResourceProvider + Send>,
        Box<dyn ResourceProvider + Send>,
        Box<dyn ResourceProvider + Send>,
        Box<dyn ResourceProvider + Send>,
    ) {
        match self {
            ModelSource::Pretrained => (
                Box::new(RemoteResource::from_pretrained(Gpt2ModelResources::DIALOGPT_MEDIUM)),
                Box::new(RemoteResource::from_pretrained(Gpt2ConfigResources::DIALOGPT_MEDIUM)),
                Box::new(RemoteResource::from_pretrained(Gpt2VocabResources::DIALOGPT_MEDIUM)),
                Box::new(RemoteResource::from_pretrained(Gpt2MergesResources::DIALOGPT_MEDIUM)),
            ),
            ModelSource::Directory(dir) => (
                Box::new(LocalResource::from(dir.join("rust_model.ot"))),
                Box::new(LocalResource::from(dir.join("config.json"))),
                Box::new(LocalResource::from(dir.join("vocab.json"))),
                Box::new(LocalResource::from(dir.join("merges.txt"))),
            ),
        }
    }
}

/// Model and tokenizer owned by the worker thread.
struct LoadedModel {
    generator: GPT2Generator,
    tokenizer: Gpt2Tokenizer,
    device: Device,
    eos_token_id: i64,
}

impl LoadedModel {
    /// Sampling on or off is fixed at load time; the other decoding settings
    /// are applied per request.
    fn load(source: &ModelSource, do_sample: bool, eos_token_id: i64) -> LlmResult<Self> {
        let started = Instant::now();
        let device = Device::cuda_if_available();
        let (model, config, vocab, merges) = source.resources();

        let vocab_path = vocab
            .get_local_path()
            .map_err(|e| LlmError::ModelLoad(format!("vocabulary: {}", e)))?;
        let merges_path = merges
            .get_local_path()
            .map_err(|e| LlmError::ModelLoad(format!("merges: {}", e)))?;
        let tokenizer = Gpt2Tokenizer::from_file(&vocab_path, &merges_path, false)
            .map_err(|e| LlmError::ModelLoad(format!("tokenizer: {}", e)))?;

        let generate_config = GenerateConfig {
            model_resource: ModelResource::Torch(model),
            config_resource: config,
            vocab_resource: vocab,
            merges_resource: Some(merges),
            do_sample,
            num_beams: 3,
            no_repeat_ngram_size: 2,
            temperature: 0.7,
            device,
            ..Default::default()
        };
        let generator = GPT2Generator::new(generate_config)
            .map_err(|e| LlmError::ModelLoad(e.to_string()))?;

        info!("DialoGPT loaded in {:.1?}", started.elapsed());
        Ok(Self {
            generator,
            tokenizer,
            device,
            eos_token_id,
        })
    }

    fn encode_turn(&self, text: &str, max_length: usize) -> Vec<i64> {
        self.tokenizer
            .encode(text, None, max_length, &TruncationStrategy::LongestFirst, 0)
            .token_ids
    }

    fn options(params: &GenerationParams) -> GenerateOptions<'static> {
        let mut options = GenerateOptions {
            max_length: Some(params.max_length as i64),
            num_beams: Some(params.num_beams as i64),
            no_repeat_ngram_size: Some(params.no_repeat_ngram_size as i64),
            temperature: Some(params.temperature),
            ..Default::default()
        };
        if let Some(top_p) = params.top_p {
            options.top_p = Some(top_p);
        }
        if let Some(top_k) = params.top_k {
            options.top_k = Some(top_k as i64);
        }
        options
    }

    fn generate(&self, request: &GenerationRequest) -> LlmResult<GenerationResponse> {
        let eos = self.eos_token_id;
        let params = &request.params;

        if let Some(seed) = params.seed {
            tch::manual_seed(seed as i64);
        }

        let user_tokens = self.encode_turn(&request.user_input, params.max_length);
        let prior = fit_prior_context(request.context.as_ref(), user_tokens.len() + 1, params.max_length, eos);

        let mut bot_input = prior.unwrap_or_default();
        bot_input.push_turn(&user_tokens, eos);
        if bot_input.len() >= params.max_length {
            return Err(LlmError::Generation(format!(
                "input of {} tokens leaves no room within max_length {}",
                bot_input.len(),
                params.max_length
            )));
        }

        let input_ids = Tensor::from_slice(bot_input.tokens())
            .unsqueeze(0)
            .to(self.device);
        let output = self
            .generator
            .generate_from_ids_and_past(input_ids, None, Some(Self::options(params)))
            .map_err(|e| LlmError::Generation(e.to_string()))?;
        let sequence = output
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Generation("model returned no sequence".to_string()))?
            .indices;

        let reply_tokens: Vec<i64> = sequence
            .get(bot_input.len()..)
            .unwrap_or_default()
            .iter()
            .copied()
            .take_while(|&t| t != eos)
            .collect();
        let reply = self.tokenizer.decode(&reply_tokens, true, true).trim().to_string();

        let input_tokens = bot_input.len() as u32;
        let mut context = bot_input;
        context.push_turn(&reply_tokens, eos);

        let mut metadata = HashMap::new();
        metadata.insert("provider".to_string(), serde_json::Value::String("dialogpt".to_string()));

        Ok(GenerationResponse {
            reply,
            context,
            usage: TokenUsage::new(input_tokens, reply_tokens.len() as u32 + 1),
            metadata,
        })
    }
}

fn run_worker(source: ModelSource, do_sample: bool, eos_token_id: i64, jobs: mpsc::Receiver<Job>) {
    let model = match LoadedModel::load(&source, do_sample, eos_token_id) {
        Ok(model) => Ok(model),
        Err(e) => {
            error!("DialoGPT failed to load: {}", e);
            Err(e.to_string())
        }
    };

    for job in jobs {
        let result = match &model {
            Ok(model) => {
                let started = Instant::now();
                let result = model.generate(&job.request);
                debug!("DialoGPT generation took {:.1?}", started.elapsed());
                result
            }
            Err(reason) => Err(LlmError::ModelLoad(reason.clone())),
        };
        // The caller may have gone away; nothing to do then.
        let _ = job.reply.send(result);
    }
    info!("DialoGPT worker stopped");
}

pub struct DialoGptProvider {
    model: String,
    jobs: mpsc::Sender<Job>,
}

impl DialoGptProvider {
    /// Start the worker thread. Weights are downloaded and loaded in the
    /// background; requests queue up until loading finishes.
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let source = ModelSource::from_model_name(&config.model)?;
        let eos_token_id = config.eos_token_id;
        let do_sample = config
            .extra_options
            .get("do_sample")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("dialogpt-worker".to_string())
            .spawn(move || run_worker(source, do_sample, eos_token_id, rx))
            .map_err(|e| LlmError::ModelLoad(format!("failed to start model worker: {}", e)))?;

        Ok(Self {
            model: config.model,
            jobs: tx,
        })
    }
}

#[async_trait]
impl LlmProvider for DialoGptProvider {
    async fn generate(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                request,
                reply: reply_tx,
            })
            .map_err(|_| LlmError::Unavailable("model worker has stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| LlmError::Unavailable("model worker dropped the request".to_string()))?
    }

    fn name(&self) -> &str {
        "dialogpt"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> LlmResult<()> {
        ModelSource::from_model_name(&self.model).map(|_| ())
    }
}
