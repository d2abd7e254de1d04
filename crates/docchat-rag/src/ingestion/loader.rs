//! Load a document from disk and cut it into chunks

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::types::{Chunk, DocumentRef};

use super::chunker::RecursiveChunker;
use super::parser::extractor_for;

/// Extract and chunk documents
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    chunker: RecursiveChunker,
}

impl DocumentLoader {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        Ok(Self {
            chunker: RecursiveChunker::from_config(config)?,
        })
    }

    /// Extract text with the extractor for the document's type, then chunk it
    ///
    /// Blocking; run on a blocking thread from async code.
    pub fn load_and_chunk(&self, doc: &DocumentRef) -> Result<Vec<Chunk>> {
        let text = extractor_for(doc.file_type).extract(&doc.path)?;
        let chunks = self.chunker.chunk_document(doc, &text);

        tracing::debug!(
            "Extracted {} chars from {} into {} chunks",
            text.chars().count(),
            doc.source_label,
            chunks.len()
        );
        Ok(chunks)
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self {
            chunker: RecursiveChunker::default(),
        }
    }
}
