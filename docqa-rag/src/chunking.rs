//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`] — cuts at the last paragraph, line/sentence, or word
//!   boundary that fits the window, falling back to a hard cut
//! - [`FixedSizeChunker`] — cuts at exactly `chunk_size` characters
//!
//! Both measure in characters, never split a UTF-8 code point, and start every
//! chunk after the first exactly `chunk_overlap` characters before the end of
//! the previous one. Dropping the first `chunk_overlap` characters of every
//! chunk but the first and concatenating reproduces the document text.

use std::iter;

use crate::config::{ChunkStrategy, RagConfig};
use crate::document::{CHUNK_INDEX_KEY, Chunk, Document, SOURCE_KEY};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Create the chunker selected by `config.chunk_strategy`.
pub fn chunker_for(config: &RagConfig) -> Result<Box<dyn Chunker>> {
    Ok(match config.chunk_strategy {
        ChunkStrategy::Recursive => {
            Box::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap)?)
        }
        ChunkStrategy::Fixed => {
            Box::new(FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?)
        }
    })
}

fn validate(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::Config(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = CharText::new(&document.text);
        let spans = plan_spans(text.len(), self.chunk_size, self.chunk_overlap, |_, hard_end| {
            hard_end
        });
        text.into_chunks(document, spans)
    }
}

/// Splits text at natural boundaries: paragraphs, then lines and sentences, then words.
///
/// For each window of `chunk_size` characters the chunker looks for the last
/// paragraph break (`\n\n`) that ends inside the window. If there is none it
/// tries line and sentence ends (`\n`, `. `, `! `, `? `), then whitespace.
/// Separators stay attached to the preceding chunk. Only when no boundary
/// lies past the overlap region is the window cut hard at `chunk_size`.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(200, 20)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

/// Boundary levels, strongest first.
const SEPARATOR_LEVELS: &[&[&str]] = &[&["\n\n"], &["\n", ". ", "! ", "? "], &[" ", "\t"]];

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = CharText::new(&document.text);
        let overlap = self.chunk_overlap;
        let chars: Vec<char> = document.text.chars().collect();
        let levels: Vec<Vec<Vec<char>>> = SEPARATOR_LEVELS
            .iter()
            .map(|level| level.iter().map(|sep| sep.chars().collect()).collect())
            .collect();

        let spans = plan_spans(text.len(), self.chunk_size, overlap, |start, hard_end| {
            // The cut must land past the overlap region so the next chunk advances.
            find_boundary(&chars, &levels, start, start + overlap + 1, hard_end)
                .unwrap_or(hard_end)
        });
        text.into_chunks(document, spans)
    }
}

/// Walk the text window by window. `cut(start, hard_end)` picks the end of a
/// window that does not reach the end of the text; it must return a value in
/// `start + overlap + 1..=hard_end`.
fn plan_spans(
    len: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    mut cut: impl FnMut(usize, usize) -> usize,
) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if len == 0 {
        return spans;
    }

    let mut start = 0;
    loop {
        let hard_end = start + chunk_size;
        if hard_end >= len {
            spans.push((start, len));
            return spans;
        }
        let end = cut(start, hard_end);
        debug_assert!(end > start + chunk_overlap && end <= hard_end);
        spans.push((start, end));
        start = end - chunk_overlap;
    }
}

/// Find the largest end offset in `min_end..=max_end` that directly follows a
/// separator, trying one level at a time.
fn find_boundary(
    chars: &[char],
    levels: &[Vec<Vec<char>>],
    start: usize,
    min_end: usize,
    max_end: usize,
) -> Option<usize> {
    levels.iter().find_map(|separators| {
        separators
            .iter()
            .filter_map(|sep| {
                (min_end..=max_end).rev().find(|&end| {
                    end >= start + sep.len() && chars[end - sep.len()..end] == sep[..]
                })
            })
            .max()
    })
}

/// Text with a character-offset to byte-offset table.
struct CharText<'a> {
    text: &'a str,
    bounds: Vec<usize>,
}

impl<'a> CharText<'a> {
    fn new(text: &'a str) -> Self {
        let bounds = text.char_indices().map(|(i, _)| i).chain(iter::once(text.len())).collect();
        Self { text, bounds }
    }

    fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.bounds[start]..self.bounds[end]]
    }

    fn into_chunks(self, document: &Document, spans: Vec<(usize, usize)>) -> Vec<Chunk> {
        spans
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let mut metadata = document.metadata.clone();
                metadata.entry(SOURCE_KEY.to_string()).or_insert_with(|| document.id.clone());
                metadata.insert(CHUNK_INDEX_KEY.to_string(), index.to_string());
                Chunk {
                    index,
                    text: self.slice(start, end).to_string(),
                    start,
                    end,
                    document_id: document.id.clone(),
                    metadata,
                }
            })
            .collect()
    }
}
