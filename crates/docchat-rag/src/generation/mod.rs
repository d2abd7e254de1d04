//! Prompt construction for grounded answer generation

pub mod prompt;

pub use prompt::{PromptBuilder, FALLBACK_ANSWER};
