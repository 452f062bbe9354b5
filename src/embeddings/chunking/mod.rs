
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::Result;
use crate::config::ConfigError;
use crate::documents::Document;

/// Boundary levels tried from coarsest to finest before a hard split
const SEPARATOR_LEVELS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Represents a chunk of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text, at most `chunk_size` characters
    pub text: String,
    /// Source file of the page this chunk came from
    pub source: PathBuf,
    /// Page number within the source file
    pub page: usize,
    /// Character offset of the chunk within its page
    pub offset: usize,
    /// Position of this span among all spans of its page, blank ones included
    pub chunk_index: usize,
}

/// Configuration for content chunking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks of the same page
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }

        Ok(())
    }
}

/// Split documents into overlapping chunks.
///
/// Identical input and configuration always produce the identical sequence.
/// Blank spans (a whitespace run longer than the chunk size) are dropped so
/// they never reach the embedder. The chunks on either side of a dropped span
/// do not share `chunk_overlap` characters, and their `chunk_index` values
/// are not consecutive.
#[inline]
pub fn split_documents(documents: &[Document], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    for document in documents {
        let spans = split_text(&document.text, config)?;
        let page_chunks = spans
            .into_iter()
            .enumerate()
            .filter(|(_, (_, text))| !text.trim().is_empty())
            .map(|(chunk_index, (offset, text))| Chunk {
                text,
                source: document.source.clone(),
                page: document.page,
                offset,
                chunk_index,
            });
        chunks.extend(page_chunks);
    }

    debug!(
        "Split {} documents into {} chunks (size {}, overlap {})",
        documents.len(),
        chunks.len(),
        config.chunk_size,
        config.chunk_overlap
    );

    Ok(chunks)
}

/// Split text into `(character offset, text)` spans.
///
/// Every span holds at most `chunk_size` characters, and each span begins with
/// the last `chunk_overlap` characters of the one before it. A span ends at the
/// coarsest boundary (paragraph, line, sentence, word) that fits the budget,
/// or at the budget itself when no boundary does.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<(usize, String)>> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let mut spans = Vec::new();
    if chars.is_empty() {
        return Ok(spans);
    }

    let mut start = 0;
    loop {
        let remaining = chars.len() - start;
        if remaining <= config.chunk_size {
            spans.push((start, chars[start..].iter().collect()));
            break;
        }

        // The end must leave the next chunk starting past `start`
        let min_end = start + config.chunk_overlap + 1;
        let max_end = start + config.chunk_size;
        let end = find_boundary(&chars, min_end, max_end).unwrap_or(max_end);

        spans.push((start, chars[start..end].iter().collect()));
        start = end - config.chunk_overlap;
    }

    Ok(spans)
}

/// Find the latest end position in `min_end..=max_end` that falls just after
/// a separator, trying each separator level in order
fn find_boundary(chars: &[char], min_end: usize, max_end: usize) -> Option<usize> {
    SEPARATOR_LEVELS.iter().find_map(|level| {
        (min_end..=max_end)
            .rev()
            .find(|&end| level.iter().any(|sep| ends_with_separator(chars, end, sep)))
    })
}

fn ends_with_separator(chars: &[char], end: usize, separator: &str) -> bool {
    let sep_len = separator.chars().count();
    end >= sep_len
        && chars[end - sep_len..end]
            .iter()
            .copied()
            .eq(separator.chars())
}
