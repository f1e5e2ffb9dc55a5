//! ONNX Runtime embedding provider (all-MiniLM-L6-v2).
//!
//! Tokenizes with the model's BERT tokenizer, runs the ONNX session, and
//! mean-pools the token embeddings (weighted by the attention mask) into a
//! single 384-dimensional sentence vector.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ndarray::{Array2, Axis};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;
use tracing::info;

use super::EmbeddingProvider;

const OUTPUT_DIMENSION: usize = 384;

/// Sentence-transformer embedder backed by ONNX Runtime.
pub struct OnnxEmbedder {
    // The session is not assumed safe for concurrent runs.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
}

impl std::fmt::Debug for OnnxEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedder")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbedder {
    /// Loads the ONNX model and its tokenizer from disk.
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            anyhow::bail!("ONNX model file not found: {}", model_path.display());
        }
        if !tokenizer_path.exists() {
            anyhow::bail!("tokenizer file not found: {}", tokenizer_path.display());
        }

        let session = Session::builder()
            .context("failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("failed to set execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set optimization level")?
            .with_intra_threads(4)
            .context("failed to set intra threads")?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;

        info!(model = %model_path.display(), "embedding model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension: OUTPUT_DIMENSION,
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenization failed: {e}"))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids = vec![0i64; input_ids.len()];

        let mask_for_pooling = attention_mask.clone();
        let seq_len = input_ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), input_ids)
            .context("failed to build input_ids tensor")?;
        let attention_mask = Array2::from_shape_vec((1, seq_len), attention_mask)
            .context("failed to build attention_mask tensor")?;
        let token_type_ids = Array2::from_shape_vec((1, seq_len), token_type_ids)
            .context("failed to build token_type_ids tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("embedding session poisoned"))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => Value::from_array(input_ids)?,
            "attention_mask" => Value::from_array(attention_mask)?,
            "token_type_ids" => Value::from_array(token_type_ids)?
        ])?;

        // Token-level output is [batch, seq_len, hidden]; the output name
        // varies per export, index 0 does not.
        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("failed to extract output tensor")?;
        let tokens = output.index_axis(Axis(0), 0);
        let hidden = tokens.shape()[1];

        // Mean pooling over non-padding tokens.
        let mut pooled = vec![0.0f32; hidden];
        let mut mask_sum = 0.0f32;
        for (i, row) in tokens.axis_iter(Axis(0)).enumerate() {
            let weight = mask_for_pooling[i] as f32;
            mask_sum += weight;
            for (j, value) in row.iter().enumerate() {
                pooled[j] += value * weight;
            }
        }
        for value in &mut pooled {
            *value /= mask_sum.max(1e-9);
        }

        if pooled.len() != self.dimension {
            anyhow::bail!(
                "unexpected embedding dimension: {} (expected {})",
                pooled.len(),
                self.dimension
            );
        }

        Ok(pooled)
    }
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
