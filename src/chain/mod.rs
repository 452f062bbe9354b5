//! Retrieval-generation chain
//!
//! Answers one question per call by running a fixed sequence of stages:
//! embed the question, retrieve the nearest chunks, join them into a context,
//! fill the prompt template, generate, and trim the completion. Each stage is
//! a plain function over the previous stage's output so it can be exercised
//! on its own; [`RetrievalChain`] composes them and records which stage
//! failed.


use itertools::Itertools;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::{ScoredRecord, VectorIndex};
use crate::embeddings::Embedder;
use crate::generation::{GenerationParams, Generator};
use crate::{RagError, Result};

/// Separator placed between retrieved chunks in the context
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// The prompt contract: answer from the context only, decline otherwise
pub const PROMPT_TEMPLATE: &str = "Use the following pieces of information to answer the user's question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context: {context}
Question: {question}

Only return the helpful answer below and nothing else.
Helpful answer:";

/// Labels some models repeat before the answer proper
const ANSWER_PREFIXES: &[&str] = &["Helpful answer:", "Answer:"];

/// Progress of one request through the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStage {
    Received,
    Embedded,
    Retrieved,
    ContextBuilt,
    Prompted,
    Generated,
    Done,
}

impl fmt::Display for ChainStage {
    /// Names the work that produces this stage
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "request",
            Self::Embedded => "embedding",
            Self::Retrieved => "retrieval",
            Self::ContextBuilt => "context assembly",
            Self::Prompted => "prompt assembly",
            Self::Generated => "generation",
            Self::Done => "answer extraction",
        };
        f.write_str(name)
    }
}

/// A chain failure tagged with the stage that could not be reached
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct ChainError {
    pub stage: ChainStage,
    #[source]
    pub source: RagError,
}

impl ChainError {
    #[inline]
    pub fn new(stage: ChainStage, source: RagError) -> Self {
        Self { stage, source }
    }
}

trait AtStage<T> {
    fn at(self, stage: ChainStage) -> std::result::Result<T, ChainError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: ChainStage) -> std::result::Result<T, ChainError> {
        self.map_err(|source| ChainError::new(stage, source))
    }
}

/// RECEIVED → EMBEDDED
#[inline]
pub async fn embed_query(embedder: &dyn Embedder, question: &str) -> Result<Vec<f32>> {
    embedder.embed_one(question).await
}

/// EMBEDDED → RETRIEVED: the `k` most similar records, most similar first
#[inline]
pub async fn retrieve(
    index: &dyn VectorIndex,
    index_name: &str,
    vector: &[f32],
    k: usize,
) -> Result<Vec<ScoredRecord>> {
    index.query(index_name, vector, k).await
}

/// RETRIEVED → CONTEXT_BUILT: chunk texts in retrieval order
#[inline]
pub fn build_context<'a, I>(texts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    texts.into_iter().join(CONTEXT_SEPARATOR)
}

/// CONTEXT_BUILT → PROMPTED
#[inline]
pub fn build_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replacen("{question}", question, 1)
        .replacen("{context}", context, 1)
}

/// PROMPTED → GENERATED
#[inline]
pub async fn generate(
    generator: &dyn Generator,
    prompt: &str,
    params: &GenerationParams,
) -> Result<String> {
    generator.generate(prompt, params).await
}

/// GENERATED → DONE: strip surrounding whitespace and a repeated answer label
#[inline]
pub fn extract_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    ANSWER_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Question answering over one vector index.
///
/// Holds only shared read-only handles, so one instance may serve concurrent
/// requests.
pub struct RetrievalChain {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    index_name: String,
    k: usize,
    params: GenerationParams,
}

impl RetrievalChain {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            index_name: index_name.into(),
            k: 2,
            params: GenerationParams::default(),
        }
    }

    /// Number of chunks retrieved per question
    #[inline]
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    #[inline]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    #[inline]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Run every stage for `question`
    #[inline]
    pub async fn answer(&self, question: &str) -> std::result::Result<String, ChainError> {
        let started = Instant::now();
        debug!("Received question ({} chars)", question.chars().count());

        let vector = embed_query(self.embedder.as_ref(), question)
            .await
            .at(ChainStage::Embedded)?;

        let hits = retrieve(self.index.as_ref(), &self.index_name, &vector, self.k)
            .await
            .at(ChainStage::Retrieved)?;
        debug!(
            "Retrieved {} chunks: {:?}",
            hits.len(),
            hits.iter()
                .map(|h| (h.record.id.as_str(), h.similarity))
                .collect::<Vec<_>>()
        );
        if hits.is_empty() {
            warn!("No chunks retrieved from {}", self.index_name);
        }

        let context = build_context(hits.iter().map(|h| h.record.metadata.text.as_str()));
        let prompt = build_prompt(&context, question);

        let generation_started = Instant::now();
        let raw = generate(self.generator.as_ref(), &prompt, &self.params)
            .await
            .at(ChainStage::Generated)?;
        debug!("Generation took {:?}", generation_started.elapsed());

        let answer = extract_answer(&raw);
        if answer.is_empty() {
            return Err(ChainError::new(
                ChainStage::Done,
                RagError::Generation("Model returned an empty answer".to_string()),
            ));
        }
        info!(
            "Answered from {} chunks in {:?}",
            hits.len(),
            started.elapsed()
        );
        Ok(answer)
    }

    /// Answer `msg`, rendering any failure as a message that cannot be
    /// mistaken for an answer
    #[inline]
    pub async fn respond(&self, msg: &str) -> String {
        match self.answer(msg).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!("Request failed at {}: {}", err.stage, err.source);
                format!("Error: {}", err)
            }
        }
    }
}
