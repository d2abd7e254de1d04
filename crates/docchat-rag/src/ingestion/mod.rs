//! Document ingestion: text extraction, chunking and indexing

mod chunker;
#[cfg(test)]
pub(crate) mod fixtures;
mod loader;
pub mod parser;
mod pipeline;

pub use chunker::RecursiveChunker;
pub use loader::DocumentLoader;
pub use parser::{extractor_for, DocxExtractor, PdfExtractor, PlainTextExtractor, TextExtractor};
pub use pipeline::IngestPipeline;
