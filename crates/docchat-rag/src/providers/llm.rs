//! LLM provider trait for generating answers

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::types::Credentials;

/// Incremental model output
pub type TextStream = BoxStream<'static, Result<String>>;

/// Trait for LLM-based answer generation
///
/// Implementations:
/// - `GeminiClient`: Google Generative Language API, keyed by the caller
/// - `OllamaLlm`: local Ollama server (the API key is ignored)
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a complete reply to a fully rendered prompt
    async fn generate(&self, prompt: &str, credentials: &Credentials) -> Result<String>;

    /// Open a streamed reply; fragments arrive in generation order
    async fn generate_stream(&self, prompt: &str, credentials: &Credentials) -> Result<TextStream>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}

/// Retry an operation on transient errors with exponential backoff
///
/// Runs the operation at most `max_retries + 1` times. Non-transient errors
/// (bad key, malformed request) are returned immediately.
pub async fn retry_transient<F, Fut, T>(
    service: &str,
    max_retries: u32,
    base_delay: Duration,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let delay = base_delay * 2u32.pow(attempt);
                tracing::warn!(
                    "{} request failed (attempt {}/{}), retrying in {:?}: {}",
                    service,
                    attempt + 1,
                    max_retries + 1,
                    delay,
                    e
                );
                last_error = Some(e);
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Llm("Unknown error".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient("llm", 1, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::unavailable("llm", "503"))
        })
        .await;

        assert!(matches!(result, Err(Error::BackendUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient("llm", 3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Unauthorized {
                service: "llm".into(),
                message: "bad key".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(Error::Unauthorized { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_transient("llm", 1, Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::QuotaExceeded {
                    service: "llm".into(),
                    message: "429".into(),
                })
            } else {
                Ok("answer")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "answer");
    }
}
