//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use docchat_rag::providers::{HashEmbedder, LlmProvider, LocalVectorIndex, TextStream, VectorIndexBackend};
use docchat_rag::types::{Chunk, Credentials, DocumentId};
use docchat_rag::{Error, Result};

pub const DIMENSIONS: usize = 64;

/// What a scripted stream does after its fragments
#[derive(Clone)]
pub enum Tail {
    End,
    Hang,
    Fail(String),
}

/// LLM that replays fixed fragments and keeps every prompt it was given
pub struct ScriptedLlm {
    fragments: Vec<String>,
    tail: Tail,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(fragments: &[&str]) -> Self {
        Self::with_tail(fragments, Tail::End)
    }

    pub fn with_tail(fragments: &[&str], tail: Tail) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            tail,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, prompt: &str, _credentials: &Credentials) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        match &self.tail {
            Tail::Fail(message) => Err(Error::llm(message.clone())),
            _ => Ok(self.fragments.concat()),
        }
    }

    async fn generate_stream(&self, prompt: &str, _credentials: &Credentials) -> Result<TextStream> {
        self.prompts.lock().push(prompt.to_string());
        let head = stream::iter(self.fragments.clone().into_iter().map(Ok));
        let tail: BoxStream<'static, Result<String>> = match &self.tail {
            Tail::End => stream::empty::<Result<String>>().boxed(),
            Tail::Hang => stream::pending::<Result<String>>().boxed(),
            Tail::Fail(message) => stream::once(futures::future::ready(Err(Error::llm(message.clone())))).boxed(),
        };
        Ok(head.chain(tail).boxed())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }
}

pub fn embedder() -> Arc<HashEmbedder> {
    Arc::new(HashEmbedder::new(DIMENSIONS))
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

/// Store `count` chunks labelled `source` in the namespace of `doc`
pub async fn seed_document(
    index: &LocalVectorIndex,
    embedder: &HashEmbedder,
    doc: DocumentId,
    source: &str,
    count: u32,
) {
    let chunks: Vec<Chunk> = (0..count)
        .map(|i| {
            Chunk::new(
                doc,
                i,
                format!("{} section {} on harbour tides and moorings", source, i),
                source.to_string(),
            )
        })
        .collect();
    let vectors: Vec<Vec<f32>> = chunks.iter().map(|c| embedder.embed_sync(&c.content)).collect();
    index
        .upsert(&doc.namespace(), &chunks, &vectors, &Credentials::default())
        .await
        .unwrap();
}
