use super::*;
use crate::database::InMemoryIndex;
use crate::testing::{FailingEmbedder, HashingEmbedder, MisreportingEmbedder};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

const LONG_NOTE: &str = "Ibuprofen reduces fever and inflammation. It should be taken with food. \
Patients with kidney disease need a lower dose. The maximum daily dose for adults is 1200mg \
without supervision. Paracetamol is an alternative for patients who cannot take ibuprofen.";

fn corpus() -> TempDir {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("prescription.txt"),
        "The patient was prescribed 500mg of ibuprofen.",
    )
    .expect("write prescription");
    fs::write(temp_dir.path().join("notes.md"), format!("# Notes\n\n{LONG_NOTE}"))
        .expect("write notes");
    temp_dir
}

fn pipeline(index: Arc<InMemoryIndex>) -> IndexingPipeline {
    IndexingPipeline::new(Arc::new(HashingEmbedder::new(64)), index).with_batch_size(3)
}

#[tokio::test]
async fn builds_index_from_directory() {
    let data = corpus();
    let index = Arc::new(InMemoryIndex::new());

    let summary = pipeline(Arc::clone(&index))
        .build_index(data.path(), "medical", 120, 20)
        .await
        .expect("index builds");

    assert_eq!(summary.index_name, "medical");
    assert_eq!(summary.documents_loaded, 2);
    assert!(summary.chunks_indexed > 2, "long note spans several chunks");
    assert_eq!(summary.index_size, summary.chunks_indexed);

    let records = index.records("medical").await.expect("records");
    assert!(records.iter().all(|r| r.id.starts_with("doc-") && r.vector.len() == 64));
    assert!(
        records
            .iter()
            .any(|r| r.metadata.text == "The patient was prescribed 500mg of ibuprofen.")
    );
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let data = corpus();
    let index = Arc::new(InMemoryIndex::new());
    let pipeline = pipeline(Arc::clone(&index));

    let first = pipeline
        .build_index(data.path(), "medical", 100, 10)
        .await
        .expect("first run");
    let after_first = index.records("medical").await.expect("records");

    let second = pipeline
        .build_index(data.path(), "medical", 100, 10)
        .await
        .expect("second run");
    let after_second = index.records("medical").await.expect("records");

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn empty_corpus_fails_fast() {
    let data = TempDir::new().expect("should create temp dir");
    fs::write(data.path().join("scan.pdf"), "%PDF").expect("write");
    let index = Arc::new(InMemoryIndex::new());

    let err = pipeline(Arc::clone(&index))
        .build_index(data.path(), "medical", 500, 50)
        .await
        .expect_err("nothing to index");

    assert!(matches!(err, RagError::Ingestion(_)));
    assert!(index.count("medical").await.is_err(), "index never created");
}

#[tokio::test]
async fn invalid_overlap_is_config_error() {
    let data = corpus();
    let embedder = Arc::new(HashingEmbedder::new(8));
    let pipeline = IndexingPipeline::new(
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        Arc::new(InMemoryIndex::new()),
    );

    let err = pipeline
        .build_index(data.path(), "medical", 50, 50)
        .await
        .expect_err("overlap equals size");

    assert!(matches!(err, RagError::Config(_)));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dimension_conflict_leaves_index_untouched() {
    let data = corpus();
    let index = Arc::new(InMemoryIndex::new());
    index
        .ensure_index("medical", 32, DistanceMetric::Cosine)
        .await
        .expect("pre-existing index");

    let err = pipeline(Arc::clone(&index))
        .build_index(data.path(), "medical", 500, 50)
        .await
        .expect_err("64 dims into a 32-dim index");

    assert!(matches!(
        err,
        RagError::IndexConflict {
            existing: 32,
            requested: 64,
            ..
        }
    ));
    assert_eq!(index.count("medical").await.expect("count"), 0);
}

#[tokio::test]
async fn embedding_failures_commit_nothing() {
    let data = corpus();

    let index = Arc::new(InMemoryIndex::new());
    let index_handle: Arc<dyn VectorIndex> = Arc::<InMemoryIndex>::clone(&index);
    let err = IndexingPipeline::new(Arc::new(FailingEmbedder), index_handle)
        .build_index(data.path(), "medical", 500, 50)
        .await
        .expect_err("embedder fails");
    assert!(matches!(err, RagError::Embedding(_)));
    assert!(index.count("medical").await.is_err());

    let index_handle: Arc<dyn VectorIndex> = Arc::<InMemoryIndex>::clone(&index);
    let err = IndexingPipeline::new(Arc::new(MisreportingEmbedder), index_handle)
        .build_index(data.path(), "medical", 500, 50)
        .await
        .expect_err("vectors do not match reported dimension");
    assert!(matches!(err, RagError::Embedding(_)));
    assert!(index.count("medical").await.is_err());
}

#[test]
fn chunk_ids_depend_on_position_only() {
    let chunk = Chunk {
        text: "alpha".to_string(),
        source: PathBuf::from("data/a.txt"),
        page: 1,
        offset: 0,
        chunk_index: 0,
    };
    let id = chunk_id(&chunk);
    assert_eq!(id.len(), "doc-".len() + 16);
    assert!(id.starts_with("doc-"));

    let edited = Chunk {
        text: "beta".to_string(),
        ..chunk.clone()
    };
    assert_eq!(chunk_id(&edited), id);

    let moved = Chunk {
        offset: 450,
        ..chunk.clone()
    };
    assert_ne!(chunk_id(&moved), id);

    let other_page = Chunk { page: 2, ..chunk };
    assert_ne!(chunk_id(&other_page), id);
}
