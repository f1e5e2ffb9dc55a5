//! Embedding provider capability.
//!
//! The retrieval store talks to embeddings through the [`EmbeddingProvider`]
//! trait. The real implementation runs all-MiniLM-L6-v2 through ONNX Runtime
//! (`onnx` module); when no provider can be loaded the store degrades to
//! keyword retrieval rather than substituting non-semantic vectors.

pub mod onnx;

pub use onnx::OnnxEmbedder;

use anyhow::Result;
use async_trait::async_trait;

/// Embeds text into a fixed-length vector.
///
/// Implementations are not assumed re-entrant; the retrieval store serializes
/// all calls through a single exclusive section.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector length.
    fn dimension(&self) -> usize;
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector is empty, the lengths differ, or either
/// magnitude is zero. Never divides by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 1.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_result_in_unit_interval() {
        let a = [0.3, -0.7, 2.0, 0.1];
        let b = [-1.5, 0.2, 0.9, 4.0];
        let sim = cosine_similarity(&a, &b);
        assert!((-1.0..=1.0).contains(&sim));
    }
}
