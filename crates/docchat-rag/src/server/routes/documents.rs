//! Document ingestion and vector deletion endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{DocumentId, DocumentRef};

use super::credentials_from_headers;

/// Body of `POST /api/documents/:id/ingest`
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// Stored file on the server's filesystem
    pub path: PathBuf,
    /// Attribution label; defaults to the file name
    #[serde(default)]
    pub source_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub document_id: i64,
    pub chunk_count: usize,
    pub processing_time_ms: u64,
}

/// POST /api/documents/:id/ingest - Chunk, embed and index one document
pub async fn ingest_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>> {
    let start = Instant::now();
    let credentials = credentials_from_headers(&headers);

    let mut doc = DocumentRef::from_path(DocumentId(id), request.path)?;
    if let Some(label) = request.source_label.filter(|l| !l.trim().is_empty()) {
        doc = doc.with_label(label);
    }

    let chunk_count = state.pipeline().ingest(&doc, &credentials).await?;
    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        "Ingested document {} ({} chunks) in {}ms",
        id,
        chunk_count,
        processing_time_ms
    );

    Ok(Json(IngestResponse {
        document_id: id,
        chunk_count,
        processing_time_ms,
    }))
}

/// DELETE /api/documents/:id/vectors - Best-effort namespace removal
///
/// Always answers 204; backend failures are logged.
pub async fn delete_document_vectors(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> StatusCode {
    let credentials = credentials_from_headers(&headers);
    state
        .pipeline()
        .delete_document_vectors(DocumentId(id), &credentials)
        .await;
    StatusCode::NO_CONTENT
}
