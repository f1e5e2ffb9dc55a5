pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extract;
pub mod inference;
pub mod store;

pub use config::Settings;
pub use engine::{ChatStream, ConversationEngine, EngineConfig, EngineState, Role, Turn};
pub use error::{BackendError, EngineError, ExtractError, StoreError};
pub use inference::{
    BackendFactory, GenerationRequest, InferenceBackend, LlamaCppBackend, LlamaCppConfig,
    SamplingParameters, StopReason, TokenSink,
};
pub use store::{
    Document, DocumentKind, EmbeddingModelPaths, IndexedEntry, RetrievalStore, StoreConfig,
};
