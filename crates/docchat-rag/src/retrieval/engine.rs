//! Retrieval-augmented question answering over selected documents

use futures::stream::StreamExt;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::generation::PromptBuilder;
use crate::providers::{EmbeddingProvider, LlmProvider, VectorIndexBackend};
use crate::types::{Answer, Credentials, DocumentId, RetrievalResult, Sources, StreamFragment, Turn};

use super::stream::AnswerStream;

/// Context gathered for one question
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Chunks in prompt order
    pub results: Vec<RetrievalResult>,
    /// Chunk texts joined by blank lines
    pub context: String,
    /// Attribution labels of `results`
    pub sources: Sources,
}

/// Answers questions from the namespaces of the selected documents
#[derive(Clone)]
pub struct QueryEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndexBackend>,
    llm: Arc<dyn LlmProvider>,
    config: RetrievalConfig,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndexBackend>,
        llm: Arc<dyn LlmProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            llm,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Gather context for `question` from each document's namespace
    ///
    /// The question is embedded once. Each namespace contributes up to
    /// `per_document_top_k` chunks in the order the ids were given, and the
    /// concatenation is cut to `max_context_chunks`. A namespace with no
    /// vectors contributes nothing.
    pub async fn retrieve(
        &self,
        question: &str,
        document_ids: &[DocumentId],
        credentials: &Credentials,
    ) -> Result<Retrieval> {
        let mut results = Vec::new();

        if !document_ids.is_empty() {
            let query = self.embedder.embed(question).await?;
            if query.len() != self.embedder.dimensions() {
                return Err(Error::DimensionMismatch {
                    expected: self.embedder.dimensions(),
                    actual: query.len(),
                });
            }

            for id in document_ids {
                let hits = self
                    .index
                    .search(
                        &id.namespace(),
                        &query,
                        self.config.per_document_top_k,
                        credentials,
                    )
                    .await?;
                tracing::debug!("Document {} contributed {} chunks", id, hits.len());
                results.extend(hits);
            }
        }

        results.truncate(self.config.max_context_chunks);
        tracing::info!(
            "Retrieved {} chunks from {} documents via {}",
            results.len(),
            document_ids.len(),
            self.index.name()
        );

        Ok(Retrieval {
            context: PromptBuilder::build_context(&results),
            sources: PromptBuilder::collect_sources(&results),
            results,
        })
    }

    fn prompt_for(&self, question: &str, retrieval: &Retrieval, history: &[Turn]) -> String {
        PromptBuilder::build_grounding_prompt(
            question,
            &retrieval.context,
            history,
            self.config.history_turns,
        )
    }

    /// Blocking form: the full answer and its sources
    pub async fn answer(
        &self,
        question: &str,
        document_ids: &[DocumentId],
        history: &[Turn],
        credentials: &Credentials,
    ) -> Result<Answer> {
        let retrieval = self.retrieve(question, document_ids, credentials).await?;
        let prompt = self.prompt_for(question, &retrieval, history);
        let text = self.llm.generate(&prompt, credentials).await?;

        Ok(Answer {
            text,
            sources: retrieval.sources,
        })
    }

    /// Streaming form
    ///
    /// Nothing runs until the stream is polled. The first fragment has empty
    /// text and carries the sources; model output follows in order.
    pub fn answer_stream(
        &self,
        question: String,
        document_ids: Vec<DocumentId>,
        history: Vec<Turn>,
        credentials: Credentials,
    ) -> AnswerStream {
        let engine = self.clone();

        let fragments = async_stream::try_stream! {
            let retrieval = engine.retrieve(&question, &document_ids, &credentials).await?;
            let prompt = engine.prompt_for(&question, &retrieval, &history);
            let sources = retrieval.sources;

            yield StreamFragment {
                text: String::new(),
                sources: sources.clone(),
            };

            let mut tokens = engine.llm.generate_stream(&prompt, &credentials).await?;
            while let Some(token) = tokens.next().await {
                let token = token?;
                if token.is_empty() {
                    continue;
                }
                yield StreamFragment {
                    text: token,
                    sources: sources.clone(),
                };
            }
        };

        AnswerStream::new(fragments.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{HashEmbedder, LocalVectorIndex, TextStream};
    use crate::types::Chunk;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replies with fixed fragments and remembers the last prompt
    struct ScriptedLlm {
        fragments: Vec<String>,
        last_prompt: Mutex<Option<String>>,
    }

    impl ScriptedLlm {
        fn new(fragments: &[&str]) -> Self {
            Self {
                fragments: fragments.iter().map(|s| s.to_string()).collect(),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(&self, prompt: &str, _credentials: &Credentials) -> Result<String> {
            *self.last_prompt.lock() = Some(prompt.to_string());
            Ok(self.fragments.concat())
        }

        async fn generate_stream(&self, prompt: &str, _credentials: &Credentials) -> Result<TextStream> {
            *self.last_prompt.lock() = Some(prompt.to_string());
            let items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
            Ok(futures::stream::iter(items).boxed())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    async fn seeded_engine(
        dir: &tempfile::TempDir,
        llm: Arc<ScriptedLlm>,
        config: RetrievalConfig,
    ) -> QueryEngine {
        let embedder = Arc::new(HashEmbedder::new(32));
        let index = LocalVectorIndex::new(dir.path()).unwrap();

        for (doc, source, count) in [(1i64, "a.pdf", 5u32), (2, "b.txt", 5)] {
            let chunks: Vec<Chunk> = (0..count)
                .map(|i| {
                    Chunk::new(
                        DocumentId(doc),
                        i,
                        format!("{} passage {} about tides", source, i),
                        source.to_string(),
                    )
                })
                .collect();
            let vectors: Vec<Vec<f32>> = chunks
                .iter()
                .map(|c| embedder.embed_sync(&c.content))
                .collect();
            index
                .upsert(&DocumentId(doc).namespace(), &chunks, &vectors, &Credentials::default())
                .await
                .unwrap();
        }

        QueryEngine::new(embedder, Arc::new(index), llm, config)
    }

    #[tokio::test]
    async fn test_retrieve_respects_order_and_limits() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = RetrievalConfig {
            per_document_top_k: 3,
            max_context_chunks: 4,
            ..RetrievalConfig::default()
        };
        let engine = seeded_engine(&dir, Arc::new(ScriptedLlm::new(&["ok"])), config).await;

        let retrieval = engine
            .retrieve("tides", &[DocumentId(2), DocumentId(1)], &Credentials::default())
            .await
            .unwrap();

        assert_eq!(retrieval.results.len(), 4);
        assert!(retrieval.results[..3].iter().all(|r| r.namespace == "2"));
        assert_eq!(retrieval.results[3].namespace, "1");
        assert_eq!(retrieval.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_answer_without_documents_uses_empty_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::new(&["Nothing ", "found."]));
        let engine = seeded_engine(&dir, llm.clone(), RetrievalConfig::default()).await;

        let answer = engine
            .answer("tides?", &[], &[], &Credentials::default())
            .await
            .unwrap();

        assert_eq!(answer.text, "Nothing found.");
        assert!(answer.sources.is_empty());
        let prompt = llm.last_prompt.lock().clone().unwrap();
        assert!(prompt.contains("DOCUMENT CONTEXT:\n\n"));
    }

    #[tokio::test]
    async fn test_stream_leads_with_sources() {
        let dir = tempfile::TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm::new(&["Tides ", "", "rise."]));
        let engine = seeded_engine(&dir, llm, RetrievalConfig::default()).await;

        let fragments: Vec<StreamFragment> = engine
            .answer_stream(
                "tides".to_string(),
                vec![DocumentId(1)],
                vec![],
                Credentials::default(),
            )
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].text.is_empty());
        assert!(fragments[0].sources.contains("a.pdf"));
        assert_eq!(fragments[1].text, "Tides ");
        assert_eq!(fragments[2].text, "rise.");
    }
}
