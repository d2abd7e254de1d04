//! Conversation endpoints: start, metadata and history

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::server::conversations::{ConversationInfo, RecordedTurn};
use crate::server::state::AppState;
use crate::types::DocumentId;

/// Body of `POST /api/conversations`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConversationRequest {
    /// Documents the conversation will search, in priority order
    pub document_ids: Vec<i64>,
    #[serde(default)]
    pub title: Option<String>,
}

/// POST /api/conversations - Start a conversation over a fixed set of documents
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(request): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<ConversationInfo>)> {
    if request.document_ids.is_empty() {
        return Err(Error::InvalidRequest(
            "select at least one document to chat with".to_string(),
        ));
    }

    let title = request
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "New Chat".to_string());
    let document_ids = request.document_ids.into_iter().map(DocumentId).collect();

    let info = state.conversations().start(document_ids, title);
    tracing::info!("Started conversation {} ({})", info.id, info.title);
    Ok((StatusCode::CREATED, Json(info)))
}

/// GET /api/conversations/:id - Conversation metadata including its scope
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ConversationInfo>> {
    state
        .conversations()
        .info(id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))
}

/// GET /api/conversations/:id/messages - Recorded turns, oldest first
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<RecordedTurn>>> {
    state
        .conversations()
        .messages(id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))
}
