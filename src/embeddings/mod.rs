// Embeddings module
// Chunking of documents and the embedding models that vectorize them

pub mod chunking;
pub mod ollama;


use async_trait::async_trait;

use crate::{RagError, Result};

pub use chunking::{Chunk, ChunkingConfig, split_documents, split_text};
pub use ollama::{OllamaClient, OllamaEmbedder};

/// Maps text to fixed-dimension vectors.
///
/// Implementations are shared read-only across concurrent requests, and the
/// same model serves both documents and queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed each text, returning vectors in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text, typically a query
    #[inline]
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| RagError::Embedding("Model returned no embedding".to_string()))
    }

    /// Dimension of every vector this embedder produces
    fn dimension(&self) -> usize;
}

/// Reject blank inputs; they should be filtered before reaching a model
#[inline]
pub fn validate_inputs(texts: &[String]) -> Result<()> {
    if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(RagError::Embedding(format!(
            "Cannot embed empty text (input {})",
            position
        )));
    }
    Ok(())
}

/// Ensure every vector has the reported dimension
#[inline]
pub fn check_dimensions(embeddings: &[Vec<f32>], dimension: usize) -> Result<()> {
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(RagError::Embedding(format!(
            "Model returned a {}-dimensional vector, expected {}",
            bad.len(),
            dimension
        )));
    }
    Ok(())
}
