//! `troupe-core` — shared identifiers, the coordination data model, error
//! taxonomy, and configuration for the Troupe multi-agent core.
//!
//! Every other crate in the workspace depends on this one; it depends on
//! nothing but serde/chrono/uuid plumbing.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Result, TroupeError};
pub use types::{
    AgentId, AgentMessage, Conversation, ConversationId, MessageId, MessageType, RoomId,
    RoutingTier, Task, TaskId, TaskPriority, TaskStatus,
};
