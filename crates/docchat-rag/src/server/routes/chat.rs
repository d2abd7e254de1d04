//! Chat endpoints: blocking and streamed grounded answers

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap},
    response::Response,
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use crate::error::{Error, Result};
use crate::server::conversations::ConversationLog;
use crate::server::state::AppState;
use crate::types::{Answer, DocumentId, StreamEvent};

use super::credentials_from_headers;

/// Content type of streamed answers
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Body of both chat endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: i64,
    pub question: String,
    /// Optional restatement of the conversation's documents; must match the
    /// scope the conversation was started with
    #[serde(default)]
    pub document_ids: Option<Vec<i64>>,
}

impl ChatRequest {
    fn validated(mut self) -> Result<Self> {
        self.question = self.question.trim().to_string();
        if self.question.is_empty() {
            return Err(Error::InvalidRequest("question must not be empty".to_string()));
        }
        Ok(self)
    }

    /// The conversation's fixed document scope
    fn scope(&self, log: &ConversationLog) -> Result<Vec<DocumentId>> {
        let scope = log
            .scope(self.conversation_id)
            .ok_or_else(|| Error::NotFound(format!("conversation {}", self.conversation_id)))?;

        if let Some(requested) = &self.document_ids {
            let matches = requested.len() == scope.len()
                && requested.iter().zip(&scope).all(|(r, s)| *r == s.0);
            if !matches {
                return Err(Error::InvalidRequest(format!(
                    "conversation {} searches a fixed set of documents; start a new conversation to change it",
                    self.conversation_id
                )));
            }
        }
        Ok(scope)
    }
}

/// POST /api/chat - Answer a question and record both turns
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Answer>> {
    let request = request.validated()?;
    let credentials = credentials_from_headers(&headers);
    let log = state.conversations();
    let document_ids = request.scope(log)?;

    tracing::info!(
        "Chat {}: \"{}\" over {} documents",
        request.conversation_id,
        request.question,
        document_ids.len()
    );

    let history = log.history(request.conversation_id);
    log.record_user(request.conversation_id, &request.question);

    let answer = state
        .engine()
        .answer(&request.question, &document_ids, &history, &credentials)
        .await?;

    log.record_assistant(request.conversation_id, answer.text.clone(), &answer.sources);
    Ok(Json(answer))
}

/// POST /api/chat/stream - Stream an answer as newline-delimited JSON
///
/// Emits `{"chunk": ..}` lines, then `{"sources": [..], "done": true}`, or a
/// single `{"error": ..}` line if retrieval or generation fails. The assistant
/// turn is recorded when the stream ends, including when the client
/// disconnects mid-answer.
pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    let request = request.validated()?;
    let credentials = credentials_from_headers(&headers);
    let log = state.conversations();
    let document_ids = request.scope(log)?;

    tracing::info!(
        "Chat stream {}: \"{}\" over {} documents",
        request.conversation_id,
        request.question,
        document_ids.len()
    );

    let history = log.history(request.conversation_id);
    log.record_user(request.conversation_id, &request.question);

    let mut answers = state
        .engine()
        .answer_stream(request.question, document_ids, history, credentials)
        .with_recorder(log.recorder(request.conversation_id));

    let lines = async_stream::stream! {
        let mut failed = false;
        while let Some(item) = answers.next().await {
            match item {
                Ok(fragment) if fragment.text.is_empty() => {}
                Ok(fragment) => yield Ok::<_, Infallible>(StreamEvent::chunk(fragment.text).to_line()),
                Err(e) => {
                    failed = true;
                    yield Ok(StreamEvent::error(e.to_string()).to_line());
                    break;
                }
            }
        }
        if !failed {
            yield Ok(StreamEvent::done(answers.sources()).to_line());
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(lines))
        .map_err(|e| Error::Internal(format!("Failed to build stream response: {}", e)))
}
