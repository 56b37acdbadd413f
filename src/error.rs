//! Error types for the escalation service

use thiserror::Error;

/// Result type alias for escalation operations
pub type Result<T> = std::result::Result<T, CareError>;

#[derive(Error, Debug)]
pub enum CareError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for CareError {
    fn from(e: sqlx::Error) -> Self {
        CareError::Database(e.to_string())
    }
}

/// Failures talking to the text-analysis service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("nothing to classify: text is empty")]
    EmptyInput,

    #[error("text-analysis API key not configured")]
    MissingApiKey,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("provider returned no candidates")]
    EmptyResponse,

    #[error("unparseable provider response: {0}")]
    Malformed(String),
}

impl ClassifierError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassifierError::Transport(_)
            | ClassifierError::Timeout(_)
            | ClassifierError::EmptyResponse => true,
            ClassifierError::Provider { status, .. } => *status == 429 || *status >= 500,
            ClassifierError::EmptyInput
            | ClassifierError::MissingApiKey
            | ClassifierError::Malformed(_) => false,
        }
    }
}
