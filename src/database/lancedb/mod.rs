// LanceDB vector index
// Persistent storage and cosine similarity search over chunk embeddings


use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    ChunkMetadata, DistanceMetric, ScoredRecord, VectorIndex, VectorRecord,
    check_record_dimensions, rank_results,
};
use crate::{RagError, Result};

const METRIC_KEY: &str = "metric";

/// Vector index backed by a local LanceDB database, one table per index name
pub struct LanceIndex {
    connection: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for LanceIndex {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceIndex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> RagError {
    RagError::IndexUnavailable(format!("{}: {}", context, err))
}

impl LanceIndex {
    /// Connect to (creating if needed) the database directory at `path`
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", path);

        std::fs::create_dir_all(path)
            .map_err(|e| unavailable("Failed to create vector database directory", e))?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| unavailable("Failed to connect to LanceDB", e))?;

        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of every index in the database
    #[inline]
    pub async fn index_names(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| unavailable("Failed to list tables", e))
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| unavailable(&format!("Failed to open index '{}'", name), e))
    }

    async fn table_schema(table: &Table) -> Result<SchemaRef> {
        table
            .schema()
            .await
            .map_err(|e| unavailable("Failed to get table schema", e))
    }

    /// Vector dimension recorded in an existing table's schema
    fn schema_dimension(schema: &Schema) -> Result<usize> {
        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                RagError::IndexUnavailable(
                    "Could not find vector column or determine dimension".to_string(),
                )
            })
    }

    fn schema_metric(schema: &Schema) -> Result<DistanceMetric> {
        schema
            .metadata()
            .get(METRIC_KEY)
            .map(|metric| metric.parse::<DistanceMetric>())
            .transpose()
            .map(Option::unwrap_or_default)
    }

    /// Create schema with the specified vector dimension
    fn create_schema(dimension: usize, metric: DistanceMetric) -> Result<SchemaRef> {
        let size = i32::try_from(dimension)
            .map_err(|_| RagError::Config(format!("Vector dimension {} is too large", dimension)))?;
        let fields = vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), size),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("page", DataType::UInt32, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("offset", DataType::UInt32, false),
        ];
        let metadata = HashMap::from([(METRIC_KEY.to_string(), metric.to_string())]);
        Ok(Arc::new(Schema::new_with_metadata(fields, metadata)))
    }

    async fn verify_dimension(&self, name: &str, dimension: usize) -> Result<()> {
        let table = self.open_table(name).await?;
        let schema = Self::table_schema(&table).await?;
        let existing = Self::schema_dimension(&schema)?;
        if existing != dimension {
            return Err(RagError::IndexConflict {
                index: name.to_string(),
                existing,
                requested: dimension,
            });
        }
        Ok(())
    }

    fn create_record_batch(schema: SchemaRef, records: &[&VectorRecord]) -> Result<RecordBatch> {
        let dimension = Self::schema_dimension(&schema)?;
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * dimension);
        let mut texts = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut pages = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut offsets = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            texts.push(record.metadata.text.as_str());
            sources.push(record.metadata.source.as_str());
            pages.push(record.metadata.page);
            chunk_indices.push(record.metadata.chunk_index);
            offsets.push(record.metadata.offset);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let size = i32::try_from(dimension)
            .map_err(|_| RagError::Config(format!("Vector dimension {} is too large", dimension)))?;
        let vector_array =
            FixedSizeListArray::try_new(field, size, Arc::new(Float32Array::from(flat_values)), None)
                .map_err(|e| unavailable("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(sources)),
            Arc::new(UInt32Array::from(pages)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt32Array::from(offsets)),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| unavailable("Failed to create record batch", e))
    }

    async fn search(
        table: &Table,
        vector: &[f32],
        metric: DistanceMetric,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let results = table
            .vector_search(vector)
            .map_err(|e| unavailable("Failed to create vector search", e))?
            .column("vector")
            .distance_type(metric.into())
            .limit(limit)
            .execute()
            .await
            .map_err(|e| unavailable("Failed to execute search", e))?;

        Self::parse_search_results_stream(results).await
    }

    /// Parse search results from LanceDB stream
    async fn parse_search_results_stream(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<ScoredRecord>> {
        let mut scored = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| unavailable("Failed to read result stream", e))?
        {
            scored.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Parsed {} search results from stream", scored.len());
        Ok(scored)
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredRecord>> {
        let ids = string_column(batch, "id")?;
        let texts = string_column(batch, "text")?;
        let sources = string_column(batch, "source")?;
        let pages = u32_column(batch, "page")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let offsets = u32_column(batch, "offset")?;
        let vectors = batch
            .column_by_name("vector")
            .and_then(|col| col.as_any().downcast_ref::<FixedSizeListArray>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut scored = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let vector = vectors
                .map(|list| list.value(row))
                .and_then(|values| {
                    values
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|floats| floats.values().to_vec())
                })
                .unwrap_or_default();

            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            scored.push(ScoredRecord {
                record: VectorRecord {
                    id: ids.value(row).to_string(),
                    vector,
                    metadata: ChunkMetadata {
                        text: texts.value(row).to_string(),
                        source: sources.value(row).to_string(),
                        page: pages.value(row),
                        chunk_index: chunk_indices.value(row),
                        offset: offsets.value(row),
                    },
                },
                // Cosine distance is 1 - cosine similarity
                similarity: 1.0 - distance,
            });
        }
        Ok(scored)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::IndexUnavailable(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::IndexUnavailable(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::IndexUnavailable(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::IndexUnavailable(format!("Invalid {} column type", name)))
}

impl From<DistanceMetric> for DistanceType {
    #[inline]
    fn from(metric: DistanceMetric) -> Self {
        match metric {
            DistanceMetric::Cosine => Self::Cosine,
        }
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    #[inline]
    async fn ensure_index(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        if self.index_names().await?.iter().any(|n| n == name) {
            debug!("Index {} already exists, checking vector dimension", name);
            return self.verify_dimension(name, dimension).await;
        }

        info!("Creating index {} with {} dimensions ({})", name, dimension, metric);
        let schema = Self::create_schema(dimension, metric)?;
        let created = self
            .connection
            .create_empty_table(name, schema)
            .execute()
            .await;

        match created {
            Ok(_) => Ok(()),
            // A concurrent creator may have won the race; its table is only
            // acceptable if the dimensions agree
            Err(err) => {
                if self.index_names().await?.iter().any(|n| n == name) {
                    self.verify_dimension(name, dimension).await
                } else {
                    Err(unavailable("Failed to create table", err))
                }
            }
        }
    }

    #[inline]
    async fn upsert(&self, name: &str, records: &[VectorRecord]) -> Result<usize> {
        let table = self.open_table(name).await?;
        let schema = Self::table_schema(&table).await?;
        check_record_dimensions(name, Self::schema_dimension(&schema)?, records)?;

        // Last write wins for ids repeated within one call
        let unique: BTreeMap<&str, &VectorRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        if unique.is_empty() {
            debug!("No records to upsert");
            return Ok(0);
        }
        let batch_records: Vec<&VectorRecord> = unique.into_values().collect();

        let batch = Self::create_record_batch(schema, &batch_records)?;
        let batch_schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), batch_schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| unavailable("Failed to upsert records", e))?;

        debug!("Upserted {} records into {}", batch_records.len(), name);
        Ok(batch_records.len())
    }

    #[inline]
    async fn query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let table = self.open_table(name).await?;
        let schema = Self::table_schema(&table).await?;
        let dimension = Self::schema_dimension(&schema)?;
        if vector.len() != dimension {
            return Err(RagError::IndexConflict {
                index: name.to_string(),
                existing: dimension,
                requested: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let metric = Self::schema_metric(&schema)?;
        debug!("Searching {} for {} nearest ({})", name, k, metric);

        // The store cuts at `limit` in its own order, so widen the window
        // until it reaches past every record tied with the k-th
        let mut limit = k + 1;
        loop {
            let scored = Self::search(&table, vector, metric, limit).await?;
            let fetched = scored.len();
            let ranked = rank_results(scored, fetched);
            let tied_past_k = fetched == limit
                && ranked.last().map(|r| r.similarity) == ranked.get(k - 1).map(|r| r.similarity);
            if !tied_past_k {
                return Ok(rank_results(ranked, k));
            }
            debug!("Records tie at position {} in {}, widening search to {}", k, name, limit * 2);
            limit *= 2;
        }
    }

    #[inline]
    async fn count(&self, name: &str) -> Result<usize> {
        let table = self.open_table(name).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| unavailable("Failed to count rows", e))
    }

    #[inline]
    async fn optimize(&self, name: &str) -> Result<()> {
        debug!("Optimizing index {}", name);
        let table = self.open_table(name).await?;
        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| unavailable("Failed to optimize table", e))?;
        info!("Index {} optimization completed", name);
        Ok(())
    }
}
