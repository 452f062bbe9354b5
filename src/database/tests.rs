use super::*;

fn scored(id: &str, similarity: f32) -> ScoredRecord {
    ScoredRecord {
        record: VectorRecord {
            id: id.to_string(),
            vector: vec![],
            metadata: ChunkMetadata {
                text: String::new(),
                source: String::new(),
                page: 1,
                chunk_index: 0,
                offset: 0,
            },
        },
        similarity,
    }
}

#[test]
fn cosine_similarity_basics() {
    assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
}

#[test]
fn ranking_is_descending_with_id_tie_break() {
    let ranked = rank_results(
        vec![
            scored("b", 0.5),
            scored("d", 0.9),
            scored("a", 0.5),
            scored("c", 0.1),
        ],
        3,
    );
    let ids: Vec<&str> = ranked.iter().map(|r| r.record.id.as_str()).collect();
    assert_eq!(ids, vec!["d", "a", "b"]);
}

#[test]
fn metric_names() {
    assert_eq!(DistanceMetric::Cosine.to_string(), "cosine");
    assert_eq!("cosine".parse::<DistanceMetric>().expect("parse"), DistanceMetric::Cosine);
    assert!("euclid".parse::<DistanceMetric>().is_err());
}

#[test]
fn record_dimension_check() {
    let mut record = scored("a", 0.0).record;
    record.vector = vec![1.0, 2.0];
    assert!(check_record_dimensions("docs", 2, std::slice::from_ref(&record)).is_ok());
    assert!(matches!(
        check_record_dimensions("docs", 3, &[record]),
        Err(RagError::IndexConflict {
            existing: 3,
            requested: 2,
            ..
        })
    ));
}
