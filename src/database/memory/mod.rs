//! In-process vector index using exact cosine similarity.
//!
//! Backs unit tests; nothing is persisted.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    DistanceMetric, ScoredRecord, VectorIndex, VectorRecord, check_record_dimensions,
    cosine_similarity, rank_results,
};
use crate::{RagError, Result};

#[derive(Debug)]
struct Table {
    dimension: usize,
    metric: DistanceMetric,
    records: BTreeMap<String, VectorRecord>,
}

/// Indexes are stored as name → (id → record)
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record in `name`, ordered by id
    #[inline]
    pub async fn records(&self, name: &str) -> Result<Vec<VectorRecord>> {
        let tables = self.tables.read().await;
        let table = tables.get(name).ok_or_else(|| missing_index(name))?;
        Ok(table.records.values().cloned().collect())
    }
}

fn missing_index(name: &str) -> RagError {
    RagError::IndexUnavailable(format!("Index '{}' does not exist", name))
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    #[inline]
    async fn ensure_index(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(table) = tables.get(name) {
            if table.dimension != dimension {
                return Err(RagError::IndexConflict {
                    index: name.to_string(),
                    existing: table.dimension,
                    requested: dimension,
                });
            }
            return Ok(());
        }

        debug!("Creating in-memory index {} ({} dims, {})", name, dimension, metric);
        tables.insert(
            name.to_string(),
            Table {
                dimension,
                metric,
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    #[inline]
    async fn upsert(&self, name: &str, records: &[VectorRecord]) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let table = tables.get_mut(name).ok_or_else(|| missing_index(name))?;
        check_record_dimensions(name, table.dimension, records)?;

        let before = table.records.len();
        for record in records {
            table.records.insert(record.id.clone(), record.clone());
        }
        debug!(
            "Upserted {} records into {} ({} new)",
            records.len(),
            name,
            table.records.len() - before
        );
        Ok(records.len())
    }

    #[inline]
    async fn query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let tables = self.tables.read().await;
        let table = tables.get(name).ok_or_else(|| missing_index(name))?;
        if vector.len() != table.dimension {
            return Err(RagError::IndexConflict {
                index: name.to_string(),
                existing: table.dimension,
                requested: vector.len(),
            });
        }

        let scored = table
            .records
            .values()
            .map(|record| {
                let similarity = match table.metric {
                    DistanceMetric::Cosine => cosine_similarity(&record.vector, vector),
                };
                ScoredRecord {
                    record: record.clone(),
                    similarity,
                }
            })
            .collect();

        Ok(rank_results(scored, k))
    }

    #[inline]
    async fn count(&self, name: &str) -> Result<usize> {
        let tables = self.tables.read().await;
        let table = tables.get(name).ok_or_else(|| missing_index(name))?;
        Ok(table.records.len())
    }
}
