//! Core types for documents, chunks, conversations and answers

pub mod conversation;
pub mod credentials;
pub mod document;
pub mod response;

pub use conversation::{Role, Turn};
pub use credentials::{Credentials, VectorCredentials};
pub use document::{Chunk, DocumentId, DocumentRef, FileType, RetrievalResult};
pub use response::{Answer, Sources, StreamEvent, StreamFragment};
