//! Error types for the document chat core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for RAG operations
pub type Result<T> = std::result::Result<T, Error>;

/// RAG system errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or incomplete request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown resource (e.g. a conversation that was never started)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// File parsing error
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// Embedding error (including model initialization)
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Index and embedding dimensionality disagree.
    ///
    /// Backends recover from this by recreating the index; it only escapes
    /// when a caller hands vectors of the wrong length to an operation.
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Remote service unreachable or failing (network, 5xx, not ready in time)
    #[error("Backend unavailable ({service}): {message}")]
    BackendUnavailable { service: String, message: String },

    /// Rejected credentials (401/403)
    #[error("Unauthorized ({service}): {message}")]
    Unauthorized { service: String, message: String },

    /// Rate limit or quota exhausted (429)
    #[error("Quota exceeded ({service}): {message}")]
    QuotaExceeded { service: String, message: String },

    /// Vector index error
    #[error("Vector index error: {0}")]
    VectorDb(String),

    /// LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// A streamed answer ended early because retrieval or generation failed
    #[error("Stream terminated: {0}")]
    StreamTerminated(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a vector db error
    pub fn vector_db(message: impl Into<String>) -> Self {
        Self::VectorDb(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a backend-unavailable error
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status from a provider into the error taxonomy
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: String) -> Self {
        let service = service.to_string();
        let message = format!("HTTP {} - {}", status, body);
        match status.as_u16() {
            401 | 403 => Self::Unauthorized { service, message },
            429 => Self::QuotaExceeded { service, message },
            s if s >= 500 => Self::BackendUnavailable { service, message },
            _ if service == "llm" => Self::Llm(message),
            _ => Self::VectorDb(format!("{}: {}", service, message)),
        }
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BackendUnavailable { .. } | Self::QuotaExceeded { .. } => true,
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::UnsupportedFileType(_) => (StatusCode::BAD_REQUEST, "unsupported_type"),
            Error::FileParse { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "parse_error"),
            Error::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "embedding_error"),
            Error::DimensionMismatch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "dimension_mismatch")
            }
            Error::BackendUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable")
            }
            Error::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Error::QuotaExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded"),
            Error::VectorDb(_) => (StatusCode::INTERNAL_SERVER_ERROR, "vector_db_error"),
            Error::Llm(_) => (StatusCode::BAD_GATEWAY, "llm_error"),
            Error::StreamTerminated(_) => (StatusCode::BAD_GATEWAY, "stream_terminated"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
