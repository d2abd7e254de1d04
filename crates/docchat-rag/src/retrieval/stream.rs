//! Incrementally delivered answers
//!
//! [`AnswerStream`] wraps the retrieval + generation pipeline of one chat turn.
//! It accumulates the text it has handed out and, exactly once, reports the
//! final (or partial) answer to a [`TurnRecorder`]: when the model finishes,
//! when the pipeline fails, or when the consumer drops the stream early.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::{Error, Result};
use crate::types::{Sources, StreamFragment};

/// How a streamed answer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The model finished normally
    Completed,
    /// Retrieval or generation failed; carries the error message
    Failed(String),
    /// The consumer stopped reading
    Cancelled,
}

/// Text delivered by a stream up to its end
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedAnswer {
    pub text: String,
    pub sources: Sources,
    pub outcome: StreamOutcome,
}

/// Persists the assistant turn once a stream ends
pub trait TurnRecorder: Send + Sync {
    fn record(&self, answer: FinishedAnswer);
}

/// Lazy, finite, non-restartable stream of answer fragments
///
/// The first fragment has empty text and carries the sources. After an
/// error item the stream yields nothing more.
pub struct AnswerStream {
    inner: Option<BoxStream<'static, Result<StreamFragment>>>,
    text: String,
    sources: Sources,
    recorder: Option<Arc<dyn TurnRecorder>>,
    finished: bool,
}

impl AnswerStream {
    pub(crate) fn new(inner: BoxStream<'static, Result<StreamFragment>>) -> Self {
        Self {
            inner: Some(inner),
            text: String::new(),
            sources: Sources::new(),
            recorder: None,
            finished: false,
        }
    }

    /// Report the answer to `recorder` when the stream ends
    pub fn with_recorder(mut self, recorder: Arc<dyn TurnRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Answer text delivered so far
    pub fn text_so_far(&self) -> &str {
        &self.text
    }

    /// Sources announced by the first fragment
    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    /// Whether the stream has ended
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Releases the model connection
        self.inner = None;

        match &outcome {
            StreamOutcome::Completed => tracing::debug!("Answer stream completed"),
            StreamOutcome::Failed(e) => tracing::warn!("Answer stream failed: {}", e),
            StreamOutcome::Cancelled => tracing::info!(
                "Answer stream cancelled after {} chars",
                self.text.chars().count()
            ),
        }

        if let Some(recorder) = self.recorder.take() {
            recorder.record(FinishedAnswer {
                text: self.text.clone(),
                sources: self.sources.clone(),
                outcome,
            });
        }
    }
}

impl Stream for AnswerStream {
    type Item = Result<StreamFragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let inner = match this.inner.as_mut() {
            Some(inner) if !this.finished => inner,
            _ => return Poll::Ready(None),
        };

        match inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                if this.sources.is_empty() && !fragment.sources.is_empty() {
                    this.sources = fragment.sources.clone();
                }
                this.text.push_str(&fragment.text);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                let error = match e {
                    Error::StreamTerminated(_) => e,
                    other => Error::StreamTerminated(other.to_string()),
                };
                this.finish(StreamOutcome::Failed(error.to_string()));
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish(StreamOutcome::Completed);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.finish(StreamOutcome::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collector(Mutex<Vec<FinishedAnswer>>);

    impl TurnRecorder for Collector {
        fn record(&self, answer: FinishedAnswer) {
            self.0.lock().push(answer);
        }
    }

    fn fragment(text: &str) -> Result<StreamFragment> {
        Ok(StreamFragment {
            text: text.to_string(),
            sources: ["a.pdf".to_string()].into_iter().collect(),
        })
    }

    fn stream_of(items: Vec<Result<StreamFragment>>) -> AnswerStream {
        AnswerStream::new(futures::stream::iter(items).boxed())
    }

    #[tokio::test]
    async fn test_completion_recorded_once() {
        let collector = Arc::new(Collector::default());
        let mut stream = stream_of(vec![fragment(""), fragment("Hel"), fragment("lo")])
            .with_recorder(collector.clone());

        while let Some(item) = stream.next().await {
            item.unwrap();
        }
        assert!(stream.is_finished());
        drop(stream);

        let recorded = collector.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].text, "Hello");
        assert_eq!(recorded[0].outcome, StreamOutcome::Completed);
        assert!(recorded[0].sources.contains("a.pdf"));
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let collector = Arc::new(Collector::default());
        let mut stream = stream_of(vec![
            fragment(""),
            fragment("partial"),
            Err(Error::llm("connection reset")),
            fragment("never seen"),
        ])
        .with_recorder(collector.clone());

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(Error::StreamTerminated(_)))
        ));
        assert!(stream.next().await.is_none());
        drop(stream);

        let recorded = collector.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].text, "partial");
        assert!(matches!(recorded[0].outcome, StreamOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_drop_records_partial_answer() {
        let collector = Arc::new(Collector::default());
        let mut stream = stream_of(vec![fragment(""), fragment("The "), fragment("answer")])
            .with_recorder(collector.clone());

        stream.next().await.unwrap().unwrap();
        stream.next().await.unwrap().unwrap();
        assert_eq!(stream.text_so_far(), "The ");
        drop(stream);

        let recorded = collector.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].text, "The ");
        assert_eq!(recorded[0].outcome, StreamOutcome::Cancelled);
    }
}
