//! Error types shared across the conversation engine and the retrieval store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the inference backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// A required file (model weights, tokenizer) is absent.
    #[error("required resource missing: {0}")]
    ResourceMissing(PathBuf),

    /// The backend failed while loading or generating.
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Errors raised by the conversation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An operation requiring initialization was invoked before it completed.
    #[error("engine is not initialized")]
    NotReady,

    /// A generation is already in flight; the engine runs one turn at a time.
    #[error("a generation is already in progress")]
    Busy,

    /// The engine has been disposed and cannot be used again.
    #[error("engine has been disposed")]
    Disposed,

    /// No retrieval store is attached to this engine.
    #[error("no retrieval store is attached")]
    NoStore,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the retrieval store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store was used before `initialize` completed.
    #[error("store is not initialized")]
    NotReady,

    /// A persisted snapshot exists but cannot be parsed. The store refuses
    /// to start rather than silently discarding the indexed corpus; delete
    /// the file to start from an empty store.
    #[error("persisted store at {path} is corrupt: {source}")]
    CorruptStore {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Invalid chunking parameters: the stride (chunk_size - overlap) must
    /// be at least one word.
    #[error("invalid chunking parameters: chunk size {chunk_size} must exceed overlap {overlap}")]
    Configuration { chunk_size: usize, overlap: usize },

    #[error("failed to encode store snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by document text extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("document not found: {0}")]
    ResourceMissing(PathBuf),

    #[error("text extraction failed: {0}")]
    Extraction(String),
}
