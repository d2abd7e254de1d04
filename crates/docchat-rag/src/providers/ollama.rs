//! Ollama client and the providers built on it
//!
//! A single `OllamaClient` speaks `/api/embeddings`, `/api/generate` and
//! `/api/tags`; `OllamaEmbedder` and `OllamaLlm` adapt it to the provider traits.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};
use crate::types::Credentials;

use super::embedding::EmbeddingProvider;
use super::llm::{retry_transient, LlmProvider, TextStream};

/// Ollama API client with automatic retry
pub struct OllamaClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    /// Create a new Ollama client with retry support
    pub fn new(base_url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Generate an embedding with retry
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let url = url.as_str();

        retry_transient("ollama", self.max_retries, self.retry_delay, || async move {
            let response = self
                .client
                .post(url)
                .json(&EmbedRequest { model, prompt: text })
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(match Error::from_status("ollama", status, body) {
                    Error::VectorDb(message) => Error::embedding(message),
                    other => other,
                });
            }

            let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                Error::embedding(format!("Failed to parse embedding response: {}", e))
            })?;
            Ok(embed_response.embedding)
        })
        .await
    }

    /// Generate a complete response with retry
    pub async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let url = url.as_str();
        tracing::debug!("Generating answer with model: {}", model);

        retry_transient("ollama", self.max_retries, self.retry_delay, || async move {
            let request = GenerateRequest {
                model,
                prompt,
                stream: false,
                options: GenerateOptions { temperature },
            };
            let response = self.client.post(url).json(&request).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::from_status("llm", status, body));
            }

            let generate_response: GenerateResponse = response.json().await.map_err(|e| {
                Error::llm(format!("Failed to parse generation response: {}", e))
            })?;
            Ok(generate_response.response)
        })
        .await
    }

    /// Generate a streaming response from the NDJSON body
    ///
    /// Retries apply to opening the stream only.
    pub async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<TextStream> {
        let url = format!("{}/api/generate", self.base_url);
        let url = url.as_str();

        let response = retry_transient("ollama", self.max_retries, self.retry_delay, || async move {
            let request = GenerateRequest {
                model,
                prompt,
                stream: true,
                options: GenerateOptions { temperature },
            };
            let response = self.client.post(url).json(&request).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::from_status("llm", status, body));
            }
            Ok(response)
        })
        .await?;

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            // Lines, and code points within them, may be split across network
            // chunks; only complete lines are decoded
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| Error::llm(format!("Stream error: {}", e)))?;
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let Some(parsed) = parse_stream_line(&line)? else {
                        continue;
                    };
                    if !parsed.response.is_empty() {
                        yield parsed.response;
                    }
                    if parsed.done {
                        return;
                    }
                }
            }

            if let Some(parsed) = parse_stream_line(&buffer)? {
                if !parsed.response.is_empty() {
                    yield parsed.response;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Decode one NDJSON line of a generate stream; blank lines yield `None`
fn parse_stream_line(line: &[u8]) -> Result<Option<GenerateResponse>> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::llm(format!("Invalid UTF-8 in Ollama stream: {}", e)))?
        .trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Ollama embedding provider (nomic-embed-text or similar)
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Create from embedding configuration
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(OllamaClient::new(&config.ollama_url, config.timeout_secs, 1)?),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.client.embed(&self.model, text).await?;
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama LLM provider for answer generation
pub struct OllamaLlm {
    client: Arc<OllamaClient>,
    model: String,
    temperature: f32,
}

impl OllamaLlm {
    /// Create from LLM configuration (`base_url` points at the Ollama server)
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(OllamaClient::new(
                &config.base_url,
                config.timeout_secs,
                config.max_retries,
            )?),
            model: config.generate_model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    async fn generate(&self, prompt: &str, _credentials: &Credentials) -> Result<String> {
        self.client.generate(&self.model, prompt, self.temperature).await
    }

    async fn generate_stream(&self, prompt: &str, _credentials: &Credentials) -> Result<TextStream> {
        self.client
            .generate_stream(&self.model, prompt, self.temperature)
            .await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_stream_reassembles_split_lines() {
        let body = concat!(
            "{\"response\":\"Hel\",\"done\":false}\n",
            "{\"response\":\"lo\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        );
        let router = Router::new().route("/api/generate", post(move || async move { body }));
        let base = serve(router).await;

        let client = OllamaClient::new(&base, 5, 0).unwrap();
        let stream = client.generate_stream("phi3", "hi", 0.3).await.unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(parts.concat(), "Hello");
    }

    #[tokio::test]
    async fn test_stream_keeps_code_point_split_across_chunks() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async {
                let pieces = async_stream::stream! {
                    yield Ok::<_, std::io::Error>(b"{\"response\":\"caf\xC3".to_vec());
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    yield Ok(b"\xA9\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n".to_vec());
                };
                axum::body::Body::from_stream(pieces)
            }),
        );
        let base = serve(router).await;

        let client = OllamaClient::new(&base, 5, 0).unwrap();
        let stream = client.generate_stream("phi3", "hi", 0.3).await.unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(parts, vec!["café".to_string()]);
    }
}
