//! `troupe-bus` — in-process inter-agent message bus.
//!
//! Fan-out (`team`) and direct delivery into per-agent FIFO inboxes, with
//! conversation threading, a bounded global log, and substring search.
//! Delivery is synchronous: `publish` returns only after every inbox has
//! been updated. All state sits behind one mutex region per operation.

pub mod bus;
pub mod types;

pub use bus::AgentBus;
pub use types::{BusStats, RegisteredAgent};
