//! Recursive boundary-aware text chunking
//!
//! Windows are cut at the latest natural boundary that still leaves room for
//! the overlap: paragraph break, then line break, then sentence end, then any
//! whitespace, and only then a hard cut. Lengths are counted in `char`s.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::types::{Chunk, DocumentRef};

/// Text chunker with configurable size and exact overlap
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    /// Maximum chunk size in characters
    chunk_size: usize,
    /// Characters shared by adjacent chunks
    overlap: usize,
}

impl RecursiveChunker {
    /// Create a chunker; `overlap` must be smaller than `chunk_size`
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        ChunkingConfig {
            chunk_size,
            chunk_overlap: overlap,
        }
        .validate()?;
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Chunk a document's extracted text
    pub fn chunk_document(&self, doc: &DocumentRef, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(i, content)| Chunk::new(doc.id, i as u32, content, doc.source_label.clone()))
            .collect()
    }

    /// Split text into overlapping pieces
    ///
    /// Surrounding whitespace of the whole text is dropped; nothing inside is.
    /// Concatenating the first piece with every later piece minus its first
    /// `overlap` characters reproduces the trimmed text.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim().chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        let mut start = 0;

        loop {
            if chars.len() - start <= self.chunk_size {
                pieces.push(chars[start..].iter().collect());
                break;
            }

            let end = self.find_break(&chars, start);
            pieces.push(chars[start..end].iter().collect());
            start = end - self.overlap;
        }

        pieces
    }

    /// End (exclusive) of the window starting at `start`
    ///
    /// Always in `(start + overlap, start + chunk_size]`, so the next window
    /// starts strictly after this one.
    fn find_break(&self, chars: &[char], start: usize) -> usize {
        let lowest = start + self.overlap + 1;
        let highest = start + self.chunk_size;

        let latest = |pred: &dyn Fn(usize) -> bool| (lowest..=highest).rev().find(|&end| pred(end));

        latest(&|end| end >= 2 && chars[end - 2] == '\n' && chars[end - 1] == '\n')
            .or_else(|| latest(&|end| chars[end - 1] == '\n'))
            .or_else(|| self.sentence_break(chars, start, lowest, highest))
            .or_else(|| latest(&|end| chars[end - 1].is_whitespace()))
            .unwrap_or(highest)
    }

    fn sentence_break(
        &self,
        chars: &[char],
        start: usize,
        lowest: usize,
        highest: usize,
    ) -> Option<usize> {
        // One character of lookahead so a boundary exactly at `highest` is seen
        let window_end = (highest + 1).min(chars.len());
        let window: String = chars[start..window_end].iter().collect();

        let mut best = None;
        let mut char_offset = 0;
        let mut last_byte = 0;
        for (byte_idx, _) in window.split_sentence_bound_indices() {
            char_offset += window[last_byte..byte_idx].chars().count();
            last_byte = byte_idx;

            let end = start + char_offset;
            if end > highest {
                break;
            }
            if end >= lowest {
                best = Some(end);
            }
        }
        best
    }
}

impl Default for RecursiveChunker {
    /// 500 characters with 50 characters of overlap
    fn default() -> Self {
        let config = ChunkingConfig::default();
        Self {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
        }
    }
}
