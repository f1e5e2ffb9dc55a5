//! The inference backend boundary.
//!
//! A backend turns a prompt plus sampling parameters into a stream of text
//! tokens. The trait is synchronous by design: llama.cpp contexts are not
//! `Send`, so the conversation engine drives `generate` from a blocking
//! task and receives tokens through an unbounded channel. Cancellation is
//! cooperative; the backend observes the token between generation steps.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;

/// Numeric knobs controlling next-token selection. Read-only configuration,
/// supplied at engine construction and never mutated during generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingParameters {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub repeat_penalty: f32,
    pub max_tokens: usize,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            max_tokens: 512,
        }
    }
}

/// One generation call: a fully assembled prompt and its sampling knobs.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub sampling: SamplingParameters,
}

/// Why a generation call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model emitted its end-of-sequence token.
    EndOfSequence,
    /// The request's token budget was exhausted.
    MaxTokens,
    /// The cancellation token fired, or the consumer went away.
    Cancelled,
}

/// Producer side of the single-producer/single-consumer token channel.
#[derive(Debug, Clone)]
pub struct TokenSink {
    tx: mpsc::UnboundedSender<String>,
}

impl TokenSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Pushes one token; returns false when the consumer is gone.
    pub fn send(&self, token: String) -> bool {
        self.tx.send(token).is_ok()
    }
}

/// Opaque capability over the neural network: prompt in, token stream out.
///
/// The execution context is exclusively owned by one conversation engine;
/// `generate` is never invoked concurrently from two call sites.
pub trait InferenceBackend: Send + Sync {
    /// Generates tokens for `request`, pushing each into `sink` as it is
    /// produced, until the model stops, the budget is exhausted, or `cancel`
    /// fires.
    fn generate(
        &self,
        request: GenerationRequest,
        sink: TokenSink,
        cancel: CancellationToken,
    ) -> Result<StopReason, BackendError>;

    /// Maximum prompt-plus-generation length in tokens.
    fn context_size(&self) -> usize;
}

/// Deferred backend construction, so the engine's `initialize` is where the
/// model actually loads.
pub type BackendFactory =
    Box<dyn Fn() -> Result<Arc<dyn InferenceBackend>, BackendError> + Send + Sync>;
