//! Document loading
//!
//! Reads a directory of source documents into per-page [`Document`]s. Markdown
//! is rendered to plain text; plain-text files are taken as-is. A form feed
//! (`\x0C`) starts a new page.


use pulldown_cmark::{Event, Parser, TagEnd};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{RagError, Result};

const PAGE_BREAK: char = '\x0C';

/// One page of a source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Plain text of the page
    pub text: String,
    /// Path of the file the page was read from
    pub source: PathBuf,
    /// 1-based page number within the source file
    pub page: usize,
}

/// Load every page of every matching file directly inside `dir`.
///
/// Files are visited in path order. Fails with [`RagError::Ingestion`] when the
/// directory is missing, holds no file with one of `extensions`, or every
/// matching file is blank; an empty index would silently degrade every answer.
#[inline]
pub fn load_documents(dir: &Path, extensions: &[String]) -> Result<Vec<Document>> {
    if !dir.exists() {
        return Err(RagError::Ingestion(format!(
            "Document directory does not exist: {}",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(RagError::Ingestion(format!(
            "Document path is not a directory: {}",
            dir.display()
        )));
    }

    let files = matching_files(dir, extensions)?;
    if files.is_empty() {
        return Err(RagError::Ingestion(format!(
            "No documents with extension {} found in {}",
            extensions.join("/"),
            dir.display()
        )));
    }

    let mut documents = Vec::new();
    for path in &files {
        let pages = load_file(path)?;
        debug!("Loaded {} pages from {}", pages.len(), path.display());
        documents.extend(pages);
    }

    if documents.is_empty() {
        return Err(RagError::Ingestion(format!(
            "All {} matching documents in {} are empty",
            files.len(),
            dir.display()
        )));
    }

    info!(
        "Loaded {} pages from {} files in {}",
        documents.len(),
        files.len(),
        dir.display()
    );
    Ok(documents)
}

/// Load the non-blank pages of a single file
#[inline]
pub fn load_file(path: &Path) -> Result<Vec<Document>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        RagError::Ingestion(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let markdown = is_markdown(path);
    let documents = raw
        .split(PAGE_BREAK)
        .enumerate()
        .filter_map(|(i, page)| {
            let text = if markdown {
                markdown_to_text(page)
            } else {
                page.trim().to_string()
            };
            (!text.is_empty()).then(|| Document {
                text,
                source: path.to_path_buf(),
                page: i + 1,
            })
        })
        .collect();

    Ok(documents)
}

fn matching_files(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        RagError::Ingestion(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| RagError::Ingestion(format!("Failed to read directory entry: {}", e)))?
            .path();
        if path.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}

/// Render markdown to plain text, keeping block structure as blank lines
#[inline]
pub fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote(_)
                | TagEnd::Table
                | TagEnd::List(_),
            ) => text.push_str("\n\n"),
            Event::End(TagEnd::Item | TagEnd::TableRow | TagEnd::TableHead) => {
                text.push('\n');
            }
            Event::End(TagEnd::TableCell) => text.push(' '),
            _ => {}
        }
    }

    collapse_blank_lines(&text)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut newlines = 0;

    for c in text.trim().chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                result.push(c);
            }
        } else {
            newlines = 0;
            result.push(c);
        }
    }

    result
}
