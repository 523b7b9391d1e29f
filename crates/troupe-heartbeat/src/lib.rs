//! `troupe-heartbeat` — the heartbeat-manager interface and the dashboard
//! metrics feed.
//!
//! The heartbeat manager itself is an external collaborator; this crate
//! defines the trait it implements plus the bounded metrics buffer the
//! dashboard polls, filled by a 5-second collector loop.

pub mod collector;
pub mod types;

pub use collector::{MetricsBuffer, MetricsCollector, MetricsRecord};
pub use types::{BotHealth, TeamHealth, TeamHealthSource};
