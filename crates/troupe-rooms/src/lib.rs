//! `troupe-rooms` — persistent named rooms and channel bindings.
//!
//! Rooms are the primary conversational locus: channels join rooms, not the
//! other way around. Each room is one JSON document on disk; a single
//! `channel_mappings.json` index maps `<channel>:<chat_id>` pairs to room
//! ids. The `general` room is ensured on startup.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{Result, RoomError};
pub use registry::RoomRegistry;
pub use types::{ChannelMember, Room, RoomType};
