//! llama.cpp backend: GGUF model loading and token-by-token generation.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Mutex;

use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel, Special},
    sampling::LlamaSampler,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BackendError;

use super::backend::{GenerationRequest, InferenceBackend, StopReason, TokenSink};

#[derive(Debug, Clone)]
pub struct LlamaCppConfig {
    pub model_path: PathBuf,
    pub context_size: usize,
    pub gpu_layers: usize,
    pub batch_size: usize,
}

impl Default for LlamaCppConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/model.gguf"),
            context_size: 4096,
            gpu_layers: 0,
            batch_size: 512,
        }
    }
}

struct LoadedModel {
    backend: LlamaBackend,
    model: LlamaModel,
}

/// Inference backend over a locally loaded GGUF model.
///
/// A fresh context is created per generation call; the loaded model lives
/// behind a mutex because the underlying library does not allow concurrent
/// use of one execution context.
pub struct LlamaCppBackend {
    inner: Mutex<LoadedModel>,
    config: LlamaCppConfig,
}

impl LlamaCppBackend {
    /// Loads model weights from disk. A missing model file is fatal.
    pub fn load(config: LlamaCppConfig) -> Result<Self, BackendError> {
        if !config.model_path.exists() {
            return Err(BackendError::ResourceMissing(config.model_path.clone()));
        }

        let backend = LlamaBackend::init()
            .map_err(|e| BackendError::Generation(format!("failed to initialize backend: {e:?}")))?;

        let model_params =
            LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers as u32);
        let model = LlamaModel::load_from_file(&backend, &config.model_path, &model_params)
            .map_err(|e| BackendError::Generation(format!("failed to load model: {e:?}")))?;

        info!(model = %config.model_path.display(), context_size = config.context_size, "model loaded");

        Ok(Self {
            inner: Mutex::new(LoadedModel { backend, model }),
            config,
        })
    }
}

impl InferenceBackend for LlamaCppBackend {
    fn generate(
        &self,
        request: GenerationRequest,
        sink: TokenSink,
        cancel: CancellationToken,
    ) -> Result<StopReason, BackendError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| BackendError::Generation("model lock poisoned".to_string()))?;
        let LoadedModel { backend, model } = &*guard;

        // Null bytes and stray control characters (typical of PDF-sourced
        // context) break C-string handling in the tokenizer.
        let prompt = sanitize_prompt(&request.prompt);

        let prompt_tokens = model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(|e| BackendError::Generation(format!("failed to tokenize: {e:?}")))?;

        if prompt_tokens.len() >= self.config.context_size {
            return Err(BackendError::Generation(format!(
                "prompt of {} tokens exceeds context size {}",
                prompt_tokens.len(),
                self.config.context_size
            )));
        }

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.config.context_size as u32))
            .with_n_batch(self.config.batch_size as u32);
        let mut context = model
            .new_context(backend, ctx_params)
            .map_err(|e| BackendError::Generation(format!("failed to create context: {e:?}")))?;

        let mut batch = LlamaBatch::new(self.config.batch_size, 1);
        for (i, &token) in prompt_tokens.iter().enumerate() {
            let is_last = i == prompt_tokens.len() - 1;
            batch
                .add(token, i as i32, &[0], is_last)
                .map_err(|e| BackendError::Generation(format!("failed to add token: {e:?}")))?;
        }
        context
            .decode(&mut batch)
            .map_err(|e| BackendError::Generation(format!("decode failed: {e:?}")))?;

        let sampling = request.sampling;
        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::penalties(64, sampling.repeat_penalty, 0.0, 0.0),
            LlamaSampler::top_k(sampling.top_k as i32),
            LlamaSampler::top_p(sampling.top_p, 1),
            LlamaSampler::temp(sampling.temperature),
            LlamaSampler::greedy(),
        ]);

        let eos_token = model.token_eos();
        let limit = self.config.context_size.min(prompt_tokens.len() + sampling.max_tokens);
        let mut n_cur = prompt_tokens.len();

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens = sampling.max_tokens,
            "starting generation"
        );

        while n_cur < limit {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }

            let new_token = sampler.sample(&context, -1);
            if new_token == eos_token {
                return Ok(StopReason::EndOfSequence);
            }

            // Invalid UTF-8 fragments are skipped from output, but the model
            // state must still advance to avoid looping on the same token.
            match model.token_to_str(new_token, Special::Plaintext) {
                Ok(text) => {
                    if !sink.send(text) {
                        return Ok(StopReason::Cancelled);
                    }
                }
                Err(_) => {
                    warn!(token = new_token.0, "skipping invalid UTF-8 token");
                }
            }

            batch.clear();
            batch
                .add(new_token, n_cur as i32, &[0], true)
                .map_err(|e| BackendError::Generation(format!("failed to add token: {e:?}")))?;
            context
                .decode(&mut batch)
                .map_err(|e| BackendError::Generation(format!("decode failed: {e:?}")))?;
            n_cur += 1;
        }

        Ok(StopReason::MaxTokens)
    }

    fn context_size(&self) -> usize {
        self.config.context_size
    }
}

fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .filter(|c| *c != '\0' && (*c >= ' ' || *c == '\t' || *c == '\n' || *c == '\r'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_removes_null_bytes() {
        assert_eq!(sanitize_prompt("Hello\0World"), "HelloWorld");
    }

    #[test]
    fn test_sanitize_removes_control_characters() {
        assert_eq!(sanitize_prompt("Hello\x01\x02World"), "HelloWorld");
    }

    #[test]
    fn test_sanitize_preserves_whitespace_and_unicode() {
        let input = "Hello\tWorld\nNew\rLine 世界";
        assert_eq!(sanitize_prompt(input), input);
    }
}
