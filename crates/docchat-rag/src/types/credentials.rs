//! Per-user credentials handed in by the caller on every operation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Keys for the managed vector service
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorCredentials {
    /// Vector service API key
    pub api_key: String,
    /// Target index name
    pub index_name: String,
}

/// Credentials for one ingestion or query call
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// LLM API key (required by remote LLM providers)
    pub llm_api_key: String,
    /// Vector service keys (remote backend only)
    #[serde(default)]
    pub vector: Option<VectorCredentials>,
}

impl Credentials {
    /// Credentials for the local backend
    pub fn new(llm_api_key: impl Into<String>) -> Self {
        Self {
            llm_api_key: llm_api_key.into(),
            vector: None,
        }
    }

    /// Attach vector service keys
    pub fn with_vector(mut self, api_key: impl Into<String>, index_name: impl Into<String>) -> Self {
        self.vector = Some(VectorCredentials {
            api_key: api_key.into(),
            index_name: index_name.into(),
        });
        self
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for VectorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("index_name", &self.index_name)
            .finish()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("llm_api_key", &redact(&self.llm_api_key))
            .field("vector", &self.vector)
            .finish()
    }
}
