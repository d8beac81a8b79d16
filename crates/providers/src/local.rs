//! Local inference provider: runs the reasoning model in-process.
//!
//! Uses [Candle](https://github.com/huggingface/candle) to run GGUF-quantized
//! language models with no network access after the first download and no
//! API key. Stop sequences are enforced here since there is no server to do
//! it.
//!
//! Supported presets:
//! - **Qwen2** (0.5B / 1.5B): good multilingual (Korean) coverage
//! - **SmolLM** (135M–1.7B): smallest practical models
//! - **TinyLlama** (1.1B)
//! - **Phi-2** (2.7B)
//!
//! Any `.gguf` path with a `tokenizer.json` next to it also works.

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use std::path::Path;
use std::sync::Arc;
use stockwise_core::error::ProviderError;
use stockwise_core::message::{Message, Role};
use stockwise_core::provider::{ProviderRequest, ProviderResponse, Usage};
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info};
use crate::stop::truncate_at_stop;

const DEFAULT_MAX_TOKENS: u32 = 512;
const SAMPLING_SEED: u64 = 42;

// ── Well-known model aliases ───────────────────────────────────────────

/// Friendly aliases that resolve to HuggingFace repos + filenames.
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
    chat_template: ChatTemplate,
}

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy)]
enum ChatTemplate {
    /// `<|system|>\n{content}</s>\n<|user|>\n{content}</s>\n<|assistant|>\n`
    TinyLlama,
    /// `<|im_start|>system\n{content}<|im_end|>\n<|im_start|>assistant\n`
    ChatML,
}

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    match alias.to_lowercase().as_str() {
        "qwen:0.5b" | "qwen-0.5b" | "qwen2-0.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-0.5B-Instruct-GGUF",
            gguf_file: "qwen2-0_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-0.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "qwen:1.5b" | "qwen-1.5b" | "qwen2-1.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-1.5B-Instruct-GGUF",
            gguf_file: "qwen2-1_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-1.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "smollm" | "smollm:135m" | "smollm-135m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-135M-Instruct-GGUF",
            gguf_file: "smollm-135m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-135M-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "smollm:1.7b" | "smollm-1.7b" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-1.7B-Instruct-GGUF",
            gguf_file: "smollm-1.7b-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-1.7B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "tinyllama" | "tiny-llama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
            chat_template: ChatTemplate::TinyLlama,
        }),
        "phi2" | "phi-2" => Some(ModelPreset {
            repo: "TheBloke/phi-2-GGUF",
            gguf_file: "phi-2.Q4_K_M.gguf",
            tokenizer_repo: "microsoft/phi-2",
            chat_template: ChatTemplate::ChatML,
        }),
        _ => None,
    }
}

// ── Local Provider ─────────────────────────────────────────────────────

/// A provider that runs GGUF-quantized language models locally via Candle.
///
/// The model sits behind a mutex: Candle inference on CPU is single-threaded,
/// so concurrent threads queue up here.
pub struct LocalProvider {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    model_name: String,
}

/// The loaded model state (tokenizer + weights).
struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    chat_template: ChatTemplate,
    eos_token_id: u32,
}

/// One generation's output.
struct Generation {
    text: String,
    prompt_tokens: u32,
    completion_tokens: u32,
    stopped: bool,
}

impl LocalProvider {
    /// Create a new local provider. The model is loaded lazily on first
    /// request.
    ///
    /// `model_name` is a preset alias (`"qwen:0.5b"`) or a `.gguf` path.
    pub fn new(model_name: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            model_name: model_name.to_string(),
        }
    }

    /// Eagerly load the model (downloads if needed, then loads into memory).
    pub fn load(model_name: &str) -> Result<Self, ProviderError> {
        let state = LocalModelState::load(model_name)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Some(state))),
            model_name: model_name.to_string(),
        })
    }

    async fn ensure_loaded(&self) -> Result<(), ProviderError> {
        let mut state = self.inner.lock().await;
        if state.is_some() {
            return Ok(());
        }
        info!(model = %self.model_name, "Loading local model on first request");
        let name = self.model_name.clone();
        let loaded = tokio::task::spawn_blocking(move || LocalModelState::load(&name))
            .await
            .map_err(|e| ProviderError::LocalInference(format!("Model loading task failed: {e}")))??;
        *state = Some(loaded);
        Ok(())
    }
}

fn local_err(context: &str, e: impl std::fmt::Display) -> ProviderError {
    ProviderError::LocalInference(format!("{context}: {e}"))
}

/// Map Candle errors to ProviderError.
fn map_candle_err(e: candle_core::Error) -> ProviderError {
    ProviderError::LocalInference(format!("Candle inference error: {e}"))
}

impl LocalModelState {
    /// Load a model by name or path.
    fn load(model_name: &str) -> Result<Self, ProviderError> {
        let device = Device::Cpu;

        if Path::new(model_name).exists() && model_name.ends_with(".gguf") {
            return Self::load_from_path(Path::new(model_name), &device);
        }

        let preset = resolve_preset(model_name).ok_or_else(|| {
            ProviderError::ModelNotFound(format!(
                "Unknown local model '{model_name}'. Available presets: qwen:0.5b, qwen:1.5b, \
                 smollm, smollm:135m, smollm:1.7b, tinyllama, phi2. \
                 Or provide a path to a .gguf file."
            ))
        })?;

        info!(
            model = model_name,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        let api = Api::new()
            .map_err(|e| local_err("Failed to initialize HuggingFace Hub API", e))?;

        let model_path = api
            .model(preset.repo.to_string())
            .get(preset.gguf_file)
            .map_err(|e| local_err("Failed to download model", e))?;

        let tokenizer_path = api
            .model(preset.tokenizer_repo.to_string())
            .get("tokenizer.json")
            .map_err(|e| local_err("Failed to download tokenizer", e))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| local_err("Failed to load tokenizer", e))?;

        let model = Self::read_weights(&model_path, &device)?;
        let eos_token_id = eos_token(&tokenizer);

        info!(eos_token_id, "Local model loaded successfully");

        Ok(Self {
            model,
            tokenizer,
            device,
            chat_template: preset.chat_template,
            eos_token_id,
        })
    }

    /// Load from an explicit GGUF file path. Expects `tokenizer.json` in the
    /// same directory.
    fn load_from_path(path: &Path, device: &Device) -> Result<Self, ProviderError> {
        info!(path = %path.display(), "Loading local GGUF model");

        let tokenizer_path = path.with_file_name("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            ProviderError::LocalInference(format!(
                "Failed to load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        let model = Self::read_weights(path, device)?;
        let eos_token_id = eos_token(&tokenizer);

        Ok(Self {
            model,
            tokenizer,
            device: device.clone(),
            chat_template: ChatTemplate::ChatML,
            eos_token_id,
        })
    }

    fn read_weights(path: &Path, device: &Device) -> Result<qlm::ModelWeights, ProviderError> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| local_err("Failed to open model file", e))?;
        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| local_err("Failed to parse GGUF file", e))?;
        qlm::ModelWeights::from_gguf(gguf, &mut file, device)
            .map_err(|e| local_err("Failed to load model weights", e))
    }

    /// Format messages using the model's chat template.
    fn format_prompt(&self, messages: &[Message]) -> String {
        match self.chat_template {
            ChatTemplate::TinyLlama => format_tinyllama(messages),
            ChatTemplate::ChatML => format_chatml(messages),
        }
    }

    /// Run inference: tokenize → generate tokens → decode, halting at EOS,
    /// `max_tokens`, or the first stop sequence.
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop: &[String],
    ) -> Result<Generation, ProviderError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| local_err("Tokenization failed", e))?;

        let prompt_ids = encoding.get_ids();
        let prompt_tokens = prompt_ids.len() as u32;

        debug!(prompt_tokens, max_tokens, temperature, "Starting local generation");

        let mut next_input = Tensor::new(prompt_ids, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;

        let mut logits_processor = if temperature <= 0.0 {
            LogitsProcessor::new(SAMPLING_SEED, None, None)
        } else {
            LogitsProcessor::new(SAMPLING_SEED, Some(temperature as f64), None)
        };

        let mut generated: Vec<u32> = Vec::new();
        let mut position = 0;
        let mut stopped = false;

        for _ in 0..max_tokens {
            let logits = self
                .model
                .forward(&next_input, position)
                .map_err(map_candle_err)?;
            position += next_input.dim(1).map_err(map_candle_err)?;

            let logits = logits.squeeze(0).map_err(map_candle_err)?;
            let last = logits.dim(0).map_err(map_candle_err)? - 1;
            let logits = logits.get(last).map_err(map_candle_err)?;

            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;
            if next_token == self.eos_token_id {
                break;
            }
            generated.push(next_token);

            if !stop.is_empty() {
                let so_far = self.decode(&generated)?;
                if truncate_at_stop(&so_far, stop).1 {
                    stopped = true;
                    break;
                }
            }

            next_input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        let decoded = self.decode(&generated)?;
        let (text, _) = truncate_at_stop(&decoded, stop);
        let text = clean_output(text);

        debug!(
            completion_tokens = generated.len(),
            output_len = text.len(),
            stopped,
            "Generation complete"
        );

        Ok(Generation {
            text,
            prompt_tokens,
            completion_tokens: generated.len() as u32,
            stopped,
        })
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, ProviderError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| local_err("Detokenization failed", e))
    }
}

fn eos_token(tokenizer: &Tokenizer) -> u32 {
    tokenizer
        .token_to_id("</s>")
        .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
        .or_else(|| tokenizer.token_to_id("<|im_end|>"))
        .or_else(|| tokenizer.token_to_id("<|eot_id|>"))
        .unwrap_or(2)
}

/// Strip trailing special tokens the tokenizer didn't drop.
fn clean_output(text: &str) -> String {
    text.trim()
        .trim_end_matches("</s>")
        .trim_end_matches("<|im_end|>")
        .trim_end_matches("<|eot_id|>")
        .trim()
        .to_string()
}

fn format_tinyllama(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let tag = match msg.role {
            Role::System => "<|system|>",
            Role::User => "<|user|>",
            Role::Assistant => "<|assistant|>",
        };
        prompt.push_str(tag);
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("</s>\n");
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

// ── Provider trait implementation ──────────────────────────────────────

#[async_trait]
impl stockwise_core::Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.ensure_loaded().await?;

        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let temperature = request.temperature;
        let messages = request.messages;
        let stop = request.stop;

        // Candle is CPU-bound: run on a blocking thread
        let inner = self.inner.clone();
        let generation = tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| ProviderError::LocalInference("model is not loaded".into()))?;
            let prompt = state.format_prompt(&messages);
            state.generate(&prompt, max_tokens, temperature, &stop)
        })
        .await
        .map_err(|e| ProviderError::LocalInference(format!("Inference task panicked: {e}")))??;

        let mut metadata = serde_json::Map::new();
        metadata.insert("provider".into(), serde_json::Value::String("local".into()));
        metadata.insert("engine".into(), serde_json::Value::String("candle".into()));
        metadata.insert("stopped".into(), serde_json::Value::Bool(generation.stopped));

        Ok(ProviderResponse {
            content: generation.text,
            usage: Some(Usage {
                prompt_tokens: generation.prompt_tokens,
                completion_tokens: generation.completion_tokens,
                total_tokens: generation.prompt_tokens + generation.completion_tokens,
            }),
            model: format!("local/{}", self.model_name),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_preset_aliases() {
        assert!(resolve_preset("qwen:0.5b").is_some());
        assert!(resolve_preset("Qwen:1.5B").is_some());
        assert!(resolve_preset("tinyllama").is_some());
        assert!(resolve_preset("smollm:135m").is_some());
        assert!(resolve_preset("nonexistent").is_none());
    }

    #[test]
    fn unknown_model_is_model_not_found() {
        let err = LocalModelState::load("definitely-not-a-model").err().unwrap();
        assert!(matches!(err, ProviderError::ModelNotFound(_)));
    }

    #[test]
    fn chat_template_tinyllama() {
        let messages = vec![Message::system("You are helpful."), Message::user("Hello!")];
        let prompt = format_tinyllama(&messages);
        assert!(prompt.contains("<|system|>\nYou are helpful.</s>"));
        assert!(prompt.contains("<|user|>\nHello!</s>"));
        assert!(prompt.ends_with("<|assistant|>\n"));
    }

    #[test]
    fn chat_template_chatml() {
        let messages = vec![Message::system("You are helpful."), Message::user("Hi")];
        let prompt = format_chatml(&messages);
        assert!(prompt.contains("<|im_start|>system"));
        assert!(prompt.contains("<|im_start|>user\nHi<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn output_cleanup() {
        assert_eq!(clean_output("  Final Answer: 3<|im_end|>  "), "Final Answer: 3");
        assert_eq!(clean_output("Thought: ok</s>"), "Thought: ok");
    }
}
