use thiserror::Error;

#[derive(Debug, Error)]
pub enum TroupeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown agent: {id}")]
    UnknownAgent { id: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Task {id} is owned by {owner}")]
    NotTaskOwner { id: String, owner: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TroupeError>;
