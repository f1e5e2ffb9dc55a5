//! Retrieval store integration tests: ingestion, ordering, fallback,
//! persistence round-trips, and corrupt snapshot handling.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use ragchat::embeddings::EmbeddingProvider;
use ragchat::{DocumentKind, RetrievalStore, StoreConfig, StoreError};

/// Test provider returning fixed 2-d vectors per known text, so cosine
/// similarities against the query are exact by construction.
struct FakeEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl FakeEmbedder {
    /// Query embeds to [1, 0]; each document embeds to [s, sqrt(1 - s^2)]
    /// so its cosine similarity against the query is exactly `s`.
    fn with_similarities(query: &str, docs: &[(&str, f32)]) -> Self {
        let mut vectors = HashMap::new();
        vectors.insert(query.to_string(), vec![1.0, 0.0]);
        for (text, sim) in docs {
            vectors.insert(text.to_string(), vec![*sim, (1.0 - sim * sim).sqrt()]);
        }
        Self { vectors }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0, 1.0]))
    }

    fn dimension(&self) -> usize {
        2
    }
}

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        data_dir: dir.path().to_path_buf(),
        ..StoreConfig::default()
    }
}

async fn ingest_plain(store: &RetrievalStore, text: &str) {
    store
        .ingest_document_text(text, "test.txt", DocumentKind::PlainText, HashMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retrieval_ordering_and_threshold() {
    let dir = TempDir::new().unwrap();
    let docs = [
        ("alpha facts", 0.9),
        ("beta facts", 0.4),
        ("gamma facts", 0.1),
        ("delta facts", 0.6),
    ];
    let embedder = Arc::new(FakeEmbedder::with_similarities("the query", &docs));
    let store = RetrievalStore::with_provider(config(&dir), embedder);
    store.initialize().await.unwrap();

    for (text, _) in &docs {
        ingest_plain(&store, text).await;
    }

    let block = store.retrieve("the query", 3).await.unwrap();

    // 0.9, 0.6, 0.4 in that order; the 0.1 entry is below the 0.25 threshold
    let alpha = block.find("alpha facts").expect("alpha missing");
    let delta = block.find("delta facts").expect("delta missing");
    let beta = block.find("beta facts").expect("beta missing");
    assert!(alpha < delta && delta < beta);
    assert!(!block.contains("gamma facts"));
}

#[tokio::test]
async fn test_equal_scores_keep_insertion_order() {
    let dir = TempDir::new().unwrap();
    let docs = [
        ("earlier entry", 0.5),
        ("later entry", 0.5),
        ("best entry", 0.8),
    ];
    let embedder = Arc::new(FakeEmbedder::with_similarities("q", &docs));
    let store = RetrievalStore::with_provider(config(&dir), embedder);
    store.initialize().await.unwrap();
    for (text, _) in &docs {
        ingest_plain(&store, text).await;
    }

    let block = store.retrieve("q", 3).await.unwrap();

    // the tied pair ranks below the 0.8 entry, in the order ingested
    let best = block.find("best entry").expect("best missing");
    let earlier = block.find("earlier entry").expect("earlier missing");
    let later = block.find("later entry").expect("later missing");
    assert!(best < earlier && earlier < later);
}

#[tokio::test]
async fn test_top_k_caps_results() {
    let dir = TempDir::new().unwrap();
    let docs = [("one", 0.9), ("two", 0.8), ("three", 0.7)];
    let embedder = Arc::new(FakeEmbedder::with_similarities("q", &docs));
    let store = RetrievalStore::with_provider(config(&dir), embedder);
    store.initialize().await.unwrap();
    for (text, _) in &docs {
        ingest_plain(&store, text).await;
    }

    let block = store.retrieve("q", 2).await.unwrap();
    assert!(block.contains("one") && block.contains("two"));
    assert!(!block.contains("three"));
}

#[tokio::test]
async fn test_keyword_fallback_without_provider() {
    let dir = TempDir::new().unwrap();
    let store = RetrievalStore::new(config(&dir));
    store.initialize().await.unwrap();

    ingest_plain(&store, "the moon landing happened in 1969").await;
    ingest_plain(&store, "completely unrelated text").await;
    ingest_plain(&store, "another MOON reference here").await;

    let block = store.retrieve("moon", 5).await.unwrap();
    // substring containment, case-insensitive, insertion order
    let first = block.find("moon landing").expect("first hit missing");
    let second = block.find("MOON reference").expect("second hit missing");
    assert!(first < second);
    assert!(!block.contains("unrelated"));
    // keyword hits carry no similarity scores
    assert!(!block.contains("score"));
}

#[tokio::test]
async fn test_empty_store_returns_empty_block() {
    let dir = TempDir::new().unwrap();
    let store = RetrievalStore::new(config(&dir));
    store.initialize().await.unwrap();
    assert_eq!(store.retrieve("anything", 5).await.unwrap(), "");
}

#[tokio::test]
async fn test_round_trip_persistence() {
    let dir = TempDir::new().unwrap();
    let docs = [("alpha facts", 0.9), ("beta facts", 0.5)];

    let before = {
        let embedder = Arc::new(FakeEmbedder::with_similarities("q", &docs));
        let store = RetrievalStore::with_provider(config(&dir), embedder);
        store.initialize().await.unwrap();
        for (text, _) in &docs {
            ingest_plain(&store, text).await;
        }
        store.retrieve("q", 5).await.unwrap()
    };

    // fresh instance over the same directory
    let embedder = Arc::new(FakeEmbedder::with_similarities("q", &docs));
    let reloaded = RetrievalStore::with_provider(config(&dir), embedder);
    reloaded.initialize().await.unwrap();
    assert_eq!(reloaded.entry_count().await, 2);

    let after = reloaded.retrieve("q", 5).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_initialize() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("store.json"), "definitely { not json").unwrap();

    let store = RetrievalStore::new(config(&dir));
    let err = store.initialize().await.unwrap_err();
    assert!(matches!(err, StoreError::CorruptStore { .. }));
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = RetrievalStore::new(config(&dir));
    store.initialize().await.unwrap();
    ingest_plain(&store, "some content").await;

    store.initialize().await.unwrap();
    assert_eq!(store.entry_count().await, 1);
}

#[tokio::test]
async fn test_operations_require_initialize() {
    let dir = TempDir::new().unwrap();
    let store = RetrievalStore::new(config(&dir));
    let err = store.retrieve("q", 3).await.unwrap_err();
    assert!(matches!(err, StoreError::NotReady));
    let err = store
        .ingest_document_text("text", "s", DocumentKind::PlainText, HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotReady));
}

#[tokio::test]
async fn test_summary_ingestion_is_keyed_by_session() {
    let dir = TempDir::new().unwrap();
    let store = RetrievalStore::new(config(&dir));
    store.initialize().await.unwrap();

    store
        .ingest_summary("s1", "we discussed the quick brown fox")
        .await
        .unwrap();

    // visible to keyword retrieval
    let block = store.retrieve("BROWN", 5).await.unwrap();
    assert!(block.contains("quick brown fox"));

    // keyed id and kind are visible in the persisted snapshot
    let snapshot = std::fs::read_to_string(dir.path().join("store.json")).unwrap();
    let entries: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(entries[0]["document"]["id"], "summary_s1");
    assert_eq!(entries[0]["document"]["kind"], "chat_summary");
}

#[tokio::test]
async fn test_chunk_metadata_recorded() {
    let dir = TempDir::new().unwrap();
    let store = RetrievalStore::new(StoreConfig {
        data_dir: dir.path().to_path_buf(),
        chunk_size: 5,
        chunk_overlap: 1,
        ..StoreConfig::default()
    });
    store.initialize().await.unwrap();

    let text = (0..12).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
    let chunks = store
        .ingest_document_text(&text, "doc.txt", DocumentKind::PlainText, HashMap::new())
        .await
        .unwrap();
    assert_eq!(chunks, 3); // stride 4: [0,5) [4,9) [8,12)

    let snapshot = std::fs::read_to_string(dir.path().join("store.json")).unwrap();
    let entries: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(entries[0]["document"]["metadata"]["chunk_index"], "0");
    assert_eq!(entries[0]["document"]["metadata"]["chunk_count"], "3");
    assert_eq!(entries[2]["document"]["metadata"]["chunk_index"], "2");
}

#[tokio::test]
async fn test_invalid_chunking_config_fails_fast() {
    let dir = TempDir::new().unwrap();
    let store = RetrievalStore::new(StoreConfig {
        data_dir: dir.path().to_path_buf(),
        chunk_size: 10,
        chunk_overlap: 10,
        ..StoreConfig::default()
    });
    store.initialize().await.unwrap();

    let err = store
        .ingest_document_text("a b c", "s", DocumentKind::PlainText, HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Configuration { .. }));
}
