//! `troupe-store` — durable persistence for the coordination core.
//!
//! Messages, tasks and decisions live in SQLite behind a `Mutex<Connection>`;
//! a TTL+LRU [`cache::QueryCache`] fronts the hot read paths. Large tool
//! outputs are kept out of the context window by the
//! [`compact::ToolOutputCompactor`], which stores the full text here and
//! hands back a `ref://<id>` token.
//!
//! There are no cross-entity transactions. Callers needing atomicity work
//! through the single entity that aggregates their state (usually a Task).

pub mod cache;
pub mod compact;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use cache::{CacheStats, QueryCache};
pub use compact::{CompactedResult, ToolOutputCompactor, ToolOutputStore};
pub use error::{Result, StoreError};
pub use store::CoordinatorStore;
pub use types::{BotTaskStats, DecisionRecord, RecentTask, ToolOutputEntry};
