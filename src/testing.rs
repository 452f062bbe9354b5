//! Deterministic stand-ins for the model services, used by unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embeddings::{Embedder, validate_inputs};
use crate::generation::{GenerationParams, Generator};
use crate::{RagError, Result};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "did", "do", "does", "for", "how", "in", "is", "it", "much", "of",
    "on", "the", "to", "was", "were", "what", "when", "where", "which", "who", "why",
];

pub(crate) fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Bag-of-words feature hashing into a unit vector
pub(crate) fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimension];
    for token in tokens(text) {
        let slot = (fnv1a(&token) % dimension as u64) as usize;
        vector[slot] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

pub(crate) struct HashingEmbedder {
    dimension: usize,
    pub calls: AtomicUsize,
}

impl HashingEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        validate_inputs(texts)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| hash_embedding(t, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder whose vectors do not match its reported dimension
pub(crate) struct MisreportingEmbedder;

#[async_trait]
impl Embedder for MisreportingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.5; 3]).collect())
    }

    fn dimension(&self) -> usize {
        8
    }
}

pub(crate) struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("model not loaded".to_string()))
    }

    fn dimension(&self) -> usize {
        8
    }
}

/// Answers with the first context sentence that mentions a question keyword,
/// and declines otherwise, the way the prompt instructs a real model to
pub(crate) struct ContextEchoGenerator;

pub(crate) fn echo_answer(prompt: &str) -> String {
    let context = prompt
        .split_once("Context:")
        .and_then(|(_, rest)| rest.split_once("Question:"))
        .map(|(context, _)| context)
        .unwrap_or_default();
    let question = prompt
        .split_once("Question:")
        .and_then(|(_, rest)| rest.lines().next())
        .unwrap_or_default();

    let keywords = tokens(question);
    context
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .find(|sentence| {
            let words = tokens(sentence);
            keywords.iter().any(|k| words.contains(k))
        })
        .map_or_else(
            || "\n  I don't know.  \n".to_string(),
            |sentence| format!("\n\n {} \n", sentence),
        )
}

#[async_trait]
impl Generator for ContextEchoGenerator {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        Ok(echo_answer(prompt))
    }
}

pub(crate) struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        Err(RagError::Generation("out of memory".to_string()))
    }
}
