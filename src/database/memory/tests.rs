use super::*;
use crate::database::ChunkMetadata;

fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        vector,
        metadata: ChunkMetadata {
            text: format!("text for {id}"),
            source: "notes.txt".to_string(),
            page: 1,
            chunk_index: 0,
            offset: 0,
        },
    }
}

#[tokio::test]
async fn upsert_and_query() {
    let index = InMemoryIndex::new();
    index
        .ensure_index("docs", 2, DistanceMetric::Cosine)
        .await
        .expect("create");
    index
        .upsert(
            "docs",
            &[record("x", vec![1.0, 0.0]), record("y", vec![0.0, 1.0])],
        )
        .await
        .expect("upsert");

    let results = index.query("docs", &[0.9, 0.1], 1).await.expect("query");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.id, "x");
}

#[tokio::test]
async fn ties_break_by_ascending_id() {
    let index = InMemoryIndex::new();
    index
        .ensure_index("docs", 2, DistanceMetric::Cosine)
        .await
        .expect("create");
    index
        .upsert(
            "docs",
            &[
                record("c", vec![1.0, 0.0]),
                record("a", vec![2.0, 0.0]),
                record("b", vec![3.0, 0.0]),
            ],
        )
        .await
        .expect("upsert");

    let results = index.query("docs", &[1.0, 0.0], 2).await.expect("query");
    let ids: Vec<&str> = results.iter().map(|r| r.record.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn repeated_upsert_keeps_count() {
    let index = InMemoryIndex::new();
    index
        .ensure_index("docs", 2, DistanceMetric::Cosine)
        .await
        .expect("create");
    let records = vec![record("x", vec![1.0, 0.0]), record("y", vec![0.0, 1.0])];

    index.upsert("docs", &records).await.expect("first");
    index.upsert("docs", &records).await.expect("second");

    assert_eq!(index.count("docs").await.expect("count"), 2);
    assert_eq!(index.records("docs").await.expect("records"), records);
}

#[tokio::test]
async fn conflicting_dimension_is_rejected() {
    let index = InMemoryIndex::new();
    index
        .ensure_index("docs", 2, DistanceMetric::Cosine)
        .await
        .expect("create");

    assert!(matches!(
        index.ensure_index("docs", 3, DistanceMetric::Cosine).await,
        Err(RagError::IndexConflict { .. })
    ));
    assert!(matches!(
        index.upsert("docs", &[record("z", vec![1.0])]).await,
        Err(RagError::IndexConflict { .. })
    ));
    assert!(matches!(
        index.query("docs", &[1.0, 0.0, 0.0], 1).await,
        Err(RagError::IndexConflict { .. })
    ));
}

#[tokio::test]
async fn unknown_index_is_unavailable() {
    let index = InMemoryIndex::new();
    assert!(matches!(
        index.query("nope", &[1.0], 1).await,
        Err(RagError::IndexUnavailable(_))
    ));
    assert!(matches!(
        index.upsert("nope", &[]).await,
        Err(RagError::IndexUnavailable(_))
    ));
}
