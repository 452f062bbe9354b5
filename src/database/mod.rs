// Database module
// Vector index capability and its LanceDB backend, plus an in-memory backend
// for unit tests

pub mod lancedb;
#[cfg(test)]
pub mod memory;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{RagError, Result};

pub use lancedb::LanceIndex;
#[cfg(test)]
pub use memory::InMemoryIndex;

/// Similarity metric an index is created with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
}

impl fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Self::Cosine),
            other => Err(RagError::Config(format!("Unknown distance metric: {}", other))),
        }
    }
}

/// Vector record stored in an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Stable identifier, upserts overwrite by id
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Metadata stored alongside each vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// The original chunk text
    pub text: String,
    /// Source file path
    pub source: String,
    pub page: u32,
    pub chunk_index: u32,
    /// Character offset of the chunk within its page
    pub offset: u32,
}

/// A record returned by a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    /// Higher is more similar
    pub similarity: f32,
}

/// Persistent store of vector records supporting top-k similarity lookup.
///
/// Failures to reach the store surface as [`RagError::IndexUnavailable`]; an
/// empty result must mean "no records", never "store unreachable".
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the index if absent. Fails with [`RagError::IndexConflict`] when
    /// it already exists with a different dimension.
    async fn ensure_index(&self, name: &str, dimension: usize, metric: DistanceMetric)
    -> Result<()>;

    /// Insert or overwrite records by id, returning how many were written
    async fn upsert(&self, name: &str, records: &[VectorRecord]) -> Result<usize>;

    /// Up to `k` records ordered by descending similarity, ties by ascending id
    async fn query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>>;

    /// Number of records in the index
    async fn count(&self, name: &str) -> Result<usize>;

    /// Compact storage after a bulk load
    #[inline]
    async fn optimize(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Cosine similarity of two vectors, 0.0 when either has zero magnitude
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Order by descending similarity, breaking ties by ascending id, and keep `k`
#[inline]
pub fn rank_results(mut results: Vec<ScoredRecord>, k: usize) -> Vec<ScoredRecord> {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    results.truncate(k);
    results
}

/// Reject records whose vectors do not match the index dimension
#[inline]
pub fn check_record_dimensions(name: &str, dimension: usize, records: &[VectorRecord]) -> Result<()> {
    if let Some(record) = records.iter().find(|r| r.vector.len() != dimension) {
        return Err(RagError::IndexConflict {
            index: name.to_string(),
            existing: dimension,
            requested: record.vector.len(),
        });
    }
    Ok(())
}
