//! API routes for the document chat server

pub mod chat;
pub mod conversations;
pub mod documents;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    routing::{delete, get, post},
    Router,
};

use crate::server::state::AppState;
use crate::types::Credentials;

/// Header carrying the caller's LLM API key
pub const LLM_KEY_HEADER: &str = "x-llm-api-key";
/// Header carrying the caller's vector service API key
pub const VECTOR_KEY_HEADER: &str = "x-vector-api-key";
/// Header naming the caller's vector index
pub const VECTOR_INDEX_HEADER: &str = "x-vector-index";

/// Build all API routes
pub fn api_routes(max_body_size: usize) -> Router<AppState> {
    Router::new()
        // Documents
        .route("/documents/:id/ingest", post(documents::ingest_document))
        .route("/documents/:id/vectors", delete(documents::delete_document_vectors))
        // Chat
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        // Conversations
        .route("/conversations", post(conversations::start_conversation))
        .route("/conversations/:id", get(conversations::get_conversation))
        .route(
            "/conversations/:id/messages",
            get(conversations::list_messages),
        )
        // Info
        .route("/info", get(info))
        .layer(DefaultBodyLimit::max(max_body_size))
}

/// Per-request credentials from headers; absent headers become empty keys
pub fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut credentials = Credentials::new(header(LLM_KEY_HEADER).unwrap_or_default());
    if let (Some(api_key), Some(index_name)) = (header(VECTOR_KEY_HEADER), header(VECTOR_INDEX_HEADER)) {
        credentials = credentials.with_vector(api_key, index_name);
    }
    credentials
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "docchat-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document chat with per-document vector namespaces and grounded answers",
        "endpoints": {
            "POST /api/documents/:id/ingest": "Chunk, embed and index a stored document",
            "DELETE /api/documents/:id/vectors": "Remove a document's vectors (best effort)",
            "POST /api/conversations": "Start a conversation over a fixed set of documents",
            "GET /api/conversations/:id": "Conversation metadata and document scope",
            "POST /api/chat": "Answer a question from the conversation's documents",
            "POST /api/chat/stream": "Stream an answer as newline-delimited JSON",
            "GET /api/conversations/:id/messages": "List recorded chat messages"
        },
        "headers": {
            LLM_KEY_HEADER: "LLM API key",
            VECTOR_KEY_HEADER: "Vector service API key (pinecone backend)",
            VECTOR_INDEX_HEADER: "Vector index name (pinecone backend)"
        }
    }))
}
