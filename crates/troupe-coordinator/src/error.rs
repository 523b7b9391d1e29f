use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Task {id} is owned by {owner}")]
    NotTaskOwner { id: String, owner: String },

    #[error("Task {id} cannot be claimed: {reason}")]
    NotClaimable { id: String, reason: String },

    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Decision not found: {id}")]
    DecisionNotFound { id: String },

    #[error("No participants for vote")]
    NoParticipants,

    #[error("No positions provided")]
    NoPositions,

    #[error("No options to vote on")]
    NoOptions,

    #[error("Missing positions for bots: {bots}")]
    MissingPositions { bots: String },

    #[error(transparent)]
    Store(#[from] troupe_store::StoreError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
