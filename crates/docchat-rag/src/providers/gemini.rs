//! Gemini client for answer generation via the Generative Language API
//!
//! Each request is authorised with the caller's own API key.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::types::Credentials;

use super::llm::{retry_transient, LlmProvider, TextStream};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini client keyed per request
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    /// Text of the first candidate, parts concatenated
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.generate_model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Override the base backoff delay between retries
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn auth_headers(credentials: &Credentials) -> Result<HeaderMap> {
        if credentials.llm_api_key.is_empty() {
            return Err(Error::Unauthorized {
                service: "llm".to_string(),
                message: "no LLM API key supplied".to_string(),
            });
        }
        let value = HeaderValue::from_str(&credentials.llm_api_key)
            .map_err(|_| Error::Config("LLM API key contains invalid characters".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        Ok(headers)
    }

    fn request<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }

    async fn send(
        &self,
        url: &str,
        headers: &HeaderMap,
        request: &GenerateRequest<'_>,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("llm", status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    async fn generate(&self, prompt: &str, credentials: &Credentials) -> Result<String> {
        let headers = Self::auth_headers(credentials)?;
        let url = self.endpoint("generateContent");
        let request = self.request(prompt);
        let (url, headers, request) = (url.as_str(), &headers, &request);

        tracing::debug!("Generating answer with model: {}", self.model);

        retry_transient("gemini", self.max_retries, self.retry_delay, || async move {
            let response = self.send(url, headers, request).await?;
            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| Error::llm(format!("Failed to parse Gemini response: {}", e)))?;
            Ok(parsed.text())
        })
        .await
    }

    async fn generate_stream(&self, prompt: &str, credentials: &Credentials) -> Result<TextStream> {
        let headers = Self::auth_headers(credentials)?;
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let request = self.request(prompt);
        let (url, headers, request) = (url.as_str(), &headers, &request);

        let response = retry_transient("gemini", self.max_retries, self.retry_delay, || async move {
            self.send(url, headers, request).await
        })
        .await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => match serde_json::from_str::<GenerateResponse>(&event.data) {
                        Ok(parsed) => {
                            let text = parsed.text();
                            (!text.is_empty()).then_some(Ok(text))
                        }
                        Err(e) => Some(Err(Error::llm(format!(
                            "Failed to parse Gemini stream event: {}",
                            e
                        )))),
                    },
                    Err(e) => Some(Err(Error::llm(format!("Stream error: {}", e)))),
                }
            });

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<bool> {
        // Credentials are per user; reachability is all that can be checked
        match self.client.get(&self.base_url).send().await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap as AxumHeaders, StatusCode},
        routing::post,
        Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base_url: String, max_retries: u32) -> GeminiClient {
        let config = LlmConfig {
            base_url,
            generate_model: "gemini-test".to_string(),
            max_retries,
            ..LlmConfig::default()
        };
        GeminiClient::new(&config)
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_generate_sends_caller_key() {
        async fn handler(headers: AxumHeaders) -> (StatusCode, &'static str) {
            if headers.get(API_KEY_HEADER).map(|v| v.as_bytes()) == Some(b"user-key") {
                (
                    StatusCode::OK,
                    r#"{"candidates":[{"content":{"parts":[{"text":"Paris"},{"text":"."}]}}]}"#,
                )
            } else {
                (StatusCode::FORBIDDEN, "bad key")
            }
        }
        let base = serve(Router::new().route("/models/:call", post(handler))).await;
        let client = client_for(base, 1);

        let answer = client
            .generate("capital?", &Credentials::new("user-key"))
            .await
            .unwrap();
        assert_eq!(answer, "Paris.");

        let denied = client.generate("capital?", &Credentials::new("other")).await;
        assert!(matches!(denied, Err(Error::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_server_errors_retried_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/models/:call",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
                }),
            )
            .with_state(Arc::clone(&hits));
        let base = serve(router).await;

        let result = client_for(base, 1)
            .generate("q", &Credentials::new("k"))
            .await;
        assert!(matches!(result, Err(Error::BackendUnavailable { .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_parses_sse_events() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n\n",
        );
        let base = serve(Router::new().route("/models/:call", post(move || async move { body }))).await;

        let stream = client_for(base, 0)
            .generate_stream("q", &Credentials::new("k"))
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_key_rejected_before_request() {
        let client = client_for("http://127.0.0.1:9".to_string(), 0);
        let result = client.generate("q", &Credentials::default()).await;
        assert!(matches!(result, Err(Error::Unauthorized { .. })));
    }
}
