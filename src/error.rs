//! Error types for the grounded banking agent

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Dependency Errors (retryable)
    // =============================

    #[error("Schema violation for {schema}: {reason}")]
    SchemaViolation { schema: String, reason: String },

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Retrieval failure: {0}")]
    RetrievalFailure(String),

    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    // =============================
    // Host / Startup Errors
    // =============================

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Audit error: {0}")]
    AuditError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentError {
    pub fn schema_violation(schema: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            schema: schema.into(),
            reason: reason.into(),
        }
    }

    /// Whether the retry controller may spend another attempt on this error.
    /// Configuration problems are fatal and must surface at startup instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AgentError::Configuration(_))
    }
}

/// Run a dependency call under a deadline, mapping elapsed time to
/// [`AgentError::Timeout`].
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout {
            operation: operation.to_string(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}
