use criterion::{Criterion, criterion_group, criterion_main};
use docs_rag::documents::Document;
use docs_rag::embeddings::chunking::{ChunkingConfig, split_documents};
use std::hint::black_box;
use std::path::PathBuf;

const PARAGRAPH: &str = "Amoxicillin is a penicillin antibiotic used to treat bacterial infections. \
It is usually taken two or three times a day! Can it be taken with food? Yes, with or without food.\n\
Common side effects include nausea and rash.";

fn corpus(pages: usize) -> Vec<Document> {
    (1..=pages)
        .map(|page| Document {
            text: vec![PARAGRAPH; 40].join("\n\n"),
            source: PathBuf::from("benches/formulary.md"),
            page,
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let documents = corpus(20);
    let default_config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| split_documents(black_box(&documents), black_box(&default_config)))
    });

    let unbroken = vec![Document {
        text: "x".repeat(200_000),
        source: PathBuf::from("benches/unbroken.txt"),
        page: 1,
    }];
    let small_config = ChunkingConfig::new(120, 30);
    c.bench_function("chunking_hard_split", |b| {
        b.iter(|| split_documents(black_box(&unbroken), black_box(&small_config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
