//! Retrieval store: durable, queryable index of content fragments.
//!
//! Documents are chunked, embedded (when an embedding provider is loaded),
//! and appended to an in-memory entry list that is persisted wholesale to a
//! single JSON snapshot on every mutation. Retrieval scores every entry by
//! cosine similarity; without a provider it falls back to case-insensitive
//! keyword containment.
//!
//! Concurrency: one store-wide exclusive section guards all reads and writes
//! (persistence rewrites the whole snapshot, so concurrent readers are not
//! safe during a write). A second, independent section serializes every call
//! into the embedding provider, and is held even while the store-wide
//! section is already held by the same logical operation.

pub mod chunker;
pub mod types;

pub use types::{Document, DocumentKind, IndexedEntry};

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::embeddings::{cosine_similarity, EmbeddingProvider, OnnxEmbedder};
use crate::error::StoreError;
use crate::extract::{PdfExtractor, TextExtractor};

const SNAPSHOT_FILE: &str = "store.json";

/// File locations for the optional embedding model.
#[derive(Debug, Clone)]
pub struct EmbeddingModelPaths {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the persisted snapshot; created if absent.
    pub data_dir: PathBuf,
    /// Chunk window in words.
    pub chunk_size: usize,
    /// Words shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Minimum cosine similarity for a retrieval hit.
    pub similarity_threshold: f32,
    /// Inputs longer than this (in characters) are truncated before embedding.
    pub max_embed_chars: usize,
    /// Embedding model to load at initialization, if any.
    pub embedding_model: Option<EmbeddingModelPaths>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            chunk_size: 512,
            chunk_overlap: 50,
            similarity_threshold: 0.25,
            max_embed_chars: 2048,
            embedding_model: None,
        }
    }
}

#[derive(Default)]
struct StoreState {
    initialized: bool,
    entries: Vec<IndexedEntry>,
}

/// Durable index of document fragments for context augmentation.
///
/// The store is the sole owner of its entries and of the embedding provider;
/// callers (including the conversation engine) only see read-only results.
pub struct RetrievalStore {
    config: StoreConfig,
    state: Mutex<StoreState>,
    provider: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
}

impl RetrievalStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState::default()),
            provider: Mutex::new(None),
        }
    }

    /// Creates a store with a pre-loaded embedding provider, bypassing the
    /// model load at initialization.
    pub fn with_provider(config: StoreConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState::default()),
            provider: Mutex::new(Some(provider)),
        }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.config.data_dir.join(SNAPSHOT_FILE)
    }

    /// Creates the backing directory, loads a persisted snapshot if present,
    /// and lazily acquires the embedding provider.
    ///
    /// A snapshot that exists but does not parse fails with
    /// [`StoreError::CorruptStore`]; a missing or unloadable embedding model
    /// is non-fatal and degrades retrieval to keyword fallback. Idempotent:
    /// a second call is a no-op.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let path = self.snapshot_path();
        if path.exists() {
            let text = tokio::fs::read_to_string(&path).await?;
            state.entries =
                serde_json::from_str(&text).map_err(|source| StoreError::CorruptStore {
                    path: path.clone(),
                    source,
                })?;
            info!(entries = state.entries.len(), path = %path.display(), "loaded persisted store");
        }

        {
            let mut slot = self.provider.lock().await;
            if slot.is_none() {
                if let Some(paths) = &self.config.embedding_model {
                    match OnnxEmbedder::load(&paths.model, &paths.tokenizer) {
                        Ok(embedder) => *slot = Some(Arc::new(embedder)),
                        Err(e) => {
                            warn!(error = %e, "embedding model unavailable, retrieval degrades to keyword matching");
                        }
                    }
                }
            }
        }

        state.initialized = true;
        Ok(())
    }

    /// Chunks `raw_text`, embeds each chunk, appends the entries in chunk
    /// order, and persists the full snapshot. Returns the number of chunks
    /// indexed.
    pub async fn ingest_document_text(
        &self,
        raw_text: &str,
        source: &str,
        kind: DocumentKind,
        metadata: HashMap<String, String>,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(StoreError::NotReady);
        }

        let chunks = chunker::chunk(raw_text, self.config.chunk_size, self.config.chunk_overlap)?;
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let embedding = self.embed_guarded(&chunk).await?;
            let mut chunk_metadata = metadata.clone();
            chunk_metadata.insert("chunk_index".to_string(), index.to_string());
            chunk_metadata.insert("chunk_count".to_string(), total.to_string());
            state.entries.push(IndexedEntry {
                document: Document::new(chunk, source, kind, chunk_metadata),
                embedding,
            });
        }

        self.persist(&state.entries).await?;
        debug!(chunks = total, source, "ingested document");
        Ok(total)
    }

    /// Single-entry ingestion of a conversation summary, keyed by
    /// `summary_<session_id>`. The store does not deduplicate by id;
    /// overwrite semantics are the caller's concern.
    pub async fn ingest_summary(
        &self,
        session_id: &str,
        summary_text: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(StoreError::NotReady);
        }

        let embedding = self.embed_guarded(summary_text).await?;
        let metadata = HashMap::from([("session_id".to_string(), session_id.to_string())]);
        state.entries.push(IndexedEntry {
            document: Document::with_id(
                format!("summary_{session_id}"),
                summary_text,
                "chat summary",
                DocumentKind::ChatSummary,
                metadata,
            ),
            embedding,
        });

        self.persist(&state.entries).await
    }

    /// Returns a labeled context block of the `top_k` entries most relevant
    /// to `query`, or an empty string when nothing qualifies.
    ///
    /// With an embedding provider: cosine similarity, threshold filter, sort
    /// descending with insertion order breaking ties. Without one:
    /// case-insensitive substring containment in insertion order.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<String, StoreError> {
        let state = self.state.lock().await;
        if !state.initialized {
            return Err(StoreError::NotReady);
        }
        if state.entries.is_empty() || top_k == 0 {
            return Ok(String::new());
        }

        let query_embedding = self.embed_guarded(query).await?;

        let hits: Vec<(&IndexedEntry, Option<f32>)> = if query_embedding.is_empty() {
            // Keyword fallback: no provider available.
            let needle = query.to_lowercase();
            state
                .entries
                .iter()
                .filter(|entry| entry.document.content.to_lowercase().contains(&needle))
                .take(top_k)
                .map(|entry| (entry, None))
                .collect()
        } else {
            let mut scored: Vec<(&IndexedEntry, f32)> = state
                .entries
                .iter()
                .map(|entry| {
                    (
                        entry,
                        cosine_similarity(&query_embedding, &entry.embedding),
                    )
                })
                .filter(|(_, score)| *score >= self.config.similarity_threshold)
                .collect();
            // Stable sort keeps insertion order for equal scores.
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(top_k);
            scored
                .into_iter()
                .map(|(entry, score)| (entry, Some(score)))
                .collect()
        };

        if hits.is_empty() {
            return Ok(String::new());
        }

        let mut block = String::from("Relevant context:\n");
        for (rank, (entry, score)) in hits.iter().enumerate() {
            match score {
                Some(score) => {
                    let _ = writeln!(
                        block,
                        "[{}] ({}, score {:.2})",
                        rank + 1,
                        entry.document.source,
                        score
                    );
                }
                None => {
                    let _ = writeln!(block, "[{}] ({})", rank + 1, entry.document.source);
                }
            }
            block.push_str(&entry.document.content);
            block.push('\n');
        }
        Ok(block)
    }

    /// Number of indexed entries.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Distinct sources in insertion order, for display layers.
    pub async fn document_sources(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut sources = Vec::new();
        for entry in &state.entries {
            if !sources.contains(&entry.document.source) {
                sources.push(entry.document.source.clone());
            }
        }
        sources
    }

    /// Embeds text through the provider's exclusive section; returns an empty
    /// vector when no provider is loaded.
    async fn embed_guarded(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let slot = self.provider.lock().await;
        match slot.as_ref() {
            Some(provider) => {
                let input = truncate_chars(text, self.config.max_embed_chars);
                provider
                    .embed(input)
                    .await
                    .map_err(|e| StoreError::Embedding(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, entries: &[IndexedEntry]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(self.snapshot_path(), json).await?;
        Ok(())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Reads a plain-text file and ingests it, tagging the file name as source.
pub async fn ingest_text_file(store: &RetrievalStore, path: &Path) -> Result<usize, StoreError> {
    let text = tokio::fs::read_to_string(path).await?;
    store
        .ingest_document_text(&text, &file_source(path), DocumentKind::PlainText, HashMap::new())
        .await
}

/// Extracts text from a PDF and ingests it, tagging the file name as source.
pub async fn ingest_pdf(store: &RetrievalStore, path: &Path) -> Result<usize, StoreError> {
    let text = PdfExtractor.extract(path)?;
    store
        .ingest_document_text(&text, &file_source(path), DocumentKind::PdfExtract, HashMap::new())
        .await
}

fn file_source(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hello", 10), "hello");
        // multi-byte characters are not split
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
