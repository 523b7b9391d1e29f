use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Classification timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("Unparseable classifier verdict: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;
