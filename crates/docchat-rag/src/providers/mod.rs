//! Provider abstractions for embeddings, LLMs and vector indexes
//!
//! Each concern is a trait with interchangeable local and remote
//! implementations, selected from configuration in `server::state`.

pub mod embedding;
pub mod gemini;
pub mod hashing;
pub mod llm;
pub mod local;
pub mod ollama;
pub mod onnx;
pub mod pinecone;
pub mod vector_store;

pub use embedding::{EmbeddingProvider, LazyEmbedder};
pub use gemini::GeminiClient;
pub use hashing::HashEmbedder;
pub use llm::{LlmProvider, TextStream};
pub use local::LocalVectorIndex;
pub use ollama::{OllamaEmbedder, OllamaLlm};
pub use onnx::OnnxEmbedder;
pub use pinecone::{IndexHandle, IndexRegistry, PineconeIndex};
pub use vector_store::VectorIndexBackend;
