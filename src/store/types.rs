//! Data model for the retrieval store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Where an indexed fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PdfExtract,
    ChatSummary,
    PlainText,
}

/// One immutable content fragment. Created during ingestion, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source: String,
    pub kind: DocumentKind,
    pub added_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Document {
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        kind: DocumentKind,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), content, source, kind, metadata)
    }

    pub fn with_id(
        id: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        kind: DocumentKind,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source: source.into(),
            kind,
            added_at: Utc::now(),
            metadata,
        }
    }
}

/// A document plus its embedding. The embedding is empty when no embedding
/// provider was available at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub document: Document,
    pub embedding: Vec<f32>,
}
