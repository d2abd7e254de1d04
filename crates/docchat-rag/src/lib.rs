//! docchat-rag: multi-tenant document chat core
//!
//! Documents are chunked, embedded and stored in one vector namespace per
//! document, either in a local on-disk index or in a Pinecone index owned by
//! the caller. Questions are answered from the namespaces of the documents a
//! conversation selected, with the answer constrained to the retrieved
//! context and delivered whole or as a stream.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use retrieval::{AnswerStream, QueryEngine};
pub use types::{Answer, Chunk, Credentials, DocumentId, DocumentRef, FileType, StreamFragment, Turn};
