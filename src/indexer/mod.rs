// Indexer module
// Loads, chunks and embeds a document directory into a vector index

#[cfg(test)]
mod tests;

use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::database::{ChunkMetadata, DistanceMetric, VectorIndex, VectorRecord};
use crate::documents::load_documents;
use crate::embeddings::{Chunk, ChunkingConfig, Embedder, check_dimensions, split_documents};
use crate::{RagError, Result};

const DEFAULT_BATCH_SIZE: usize = 64;

/// Outcome of a successful indexing run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub index_name: String,
    pub documents_loaded: usize,
    pub chunks_indexed: usize,
    /// Records in the index once the run finished
    pub index_size: usize,
}

/// Populates a vector index from a directory of documents.
///
/// Every step depends on the previous one succeeding, and nothing is written
/// until every chunk has been embedded, so a failed run leaves the index as it
/// was. Re-running over identical input rewrites the same ids.
pub struct IndexingPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    extensions: Vec<String>,
    batch_size: usize,
}

impl IndexingPipeline {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            extensions: vec!["md".to_string(), "txt".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// File extensions picked up by the loader
    #[inline]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Chunks sent to the embedder per call
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub async fn build_index(
        &self,
        data_path: &Path,
        index_name: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<IndexSummary> {
        let started = Instant::now();
        let chunking = ChunkingConfig::new(chunk_size, chunk_overlap);
        chunking.validate()?;

        let documents = load_documents(data_path, &self.extensions)?;
        info!(
            "Loaded {} pages from {}",
            documents.len(),
            data_path.display()
        );

        let chunks = split_documents(&documents, &chunking)?;
        if chunks.is_empty() {
            return Err(RagError::Ingestion(format!(
                "No text to index in {}",
                data_path.display()
            )));
        }
        info!("Split into {} chunks", chunks.len());

        let vectors = self.embed_chunks(&chunks).await?;

        let dimension = self.embedder.dimension();
        self.index
            .ensure_index(index_name, dimension, DistanceMetric::Cosine)
            .await?;

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| to_record(chunk, vector))
            .collect::<Result<_>>()?;

        let upserted = self.index.upsert(index_name, &records).await?;
        if upserted != records.len() {
            return Err(RagError::IndexUnavailable(format!(
                "Upserted {} of {} records into '{}'",
                upserted,
                records.len(),
                index_name
            )));
        }

        if let Err(e) = self.index.optimize(index_name).await {
            warn!("Failed to optimize index {}: {}", index_name, e);
        }

        let index_size = self.index.count(index_name).await?;
        info!(
            "Indexed {} chunks into {} ({} records) in {:?}",
            records.len(),
            index_name,
            index_size,
            started.elapsed()
        );

        Ok(IndexSummary {
            index_name: index_name.to_string(),
            documents_loaded: documents.len(),
            chunks_indexed: records.len(),
            index_size,
        })
    }

    /// Embed every chunk, in batches, before anything touches the index
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let bar = if console::user_attended_stderr() {
            ProgressBar::new(chunks.len() as u64).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding chunks")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };

        let dimension = self.embedder.dimension();
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            if embeddings.len() != texts.len() {
                return Err(RagError::Embedding(format!(
                    "Embedder returned {} vectors for {} texts",
                    embeddings.len(),
                    texts.len()
                )));
            }
            check_dimensions(&embeddings, dimension)?;

            debug!("Embedded batch of {} chunks", batch.len());
            bar.inc(batch.len() as u64);
            vectors.extend(embeddings);
        }
        bar.finish_and_clear();

        Ok(vectors)
    }
}

/// Stable id derived from where a chunk sits in the corpus
#[inline]
pub fn chunk_id(chunk: &Chunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source.to_string_lossy().as_bytes());
    hasher.update([0]);
    hasher.update(chunk.page.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(chunk.offset.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("doc-{}", digest.get(..16).unwrap_or(&digest))
}

fn to_record(chunk: &Chunk, vector: Vec<f32>) -> Result<VectorRecord> {
    let narrow = |value: usize, what: &str| {
        u32::try_from(value)
            .map_err(|_| RagError::Ingestion(format!("Chunk {} {} is out of range", what, value)))
    };
    Ok(VectorRecord {
        id: chunk_id(chunk),
        vector,
        metadata: ChunkMetadata {
            text: chunk.text.clone(),
            source: chunk.source.to_string_lossy().into_owned(),
            page: narrow(chunk.page, "page")?,
            chunk_index: narrow(chunk.chunk_index, "index")?,
            offset: narrow(chunk.offset, "offset")?,
        },
    })
}
