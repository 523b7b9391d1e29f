use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use troupe_core::AgentId;

/// A component registered on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub id: AgentId,
    pub name: String,
    /// research, development, community, …
    pub domain: String,
    pub registered_at: DateTime<Utc>,
    pub messages_sent: u64,
}

/// Point-in-time bus statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub total_messages: usize,
    pub total_conversations: usize,
    pub registered_agents: usize,
    pub pending_inbox_messages: usize,
    /// message type -> count over the retained log
    pub message_types: BTreeMap<String, usize>,
    /// agent id -> messages sent
    pub agent_message_counts: BTreeMap<String, u64>,
}
