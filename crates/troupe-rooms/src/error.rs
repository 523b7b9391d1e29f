use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room already exists: {id}")]
    DuplicateRoom { id: String },

    #[error("Room not found: {id}")]
    RoomNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RoomError>;
