//! Inference backend capability and its llama.cpp implementation.

pub mod backend;
pub mod llama;

pub use backend::{
    BackendFactory, GenerationRequest, InferenceBackend, SamplingParameters, StopReason, TokenSink,
};
pub use llama::{LlamaCppBackend, LlamaCppConfig};
