use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use troupe_core::{TaskId, TaskStatus};

/// Flattened decision row as persisted. The coordinator's richer in-memory
/// `Decision` (with per-position confidence and expertise) flattens into
/// this for the audit trail; the store never depends on the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    /// consensus | dispute_resolution | expertise_based | weighted_vote
    pub decision_type: String,
    pub task_id: Option<TaskId>,
    pub participants: Vec<String>,
    /// agent id -> position text
    pub positions: BTreeMap<String, String>,
    pub reasoning: String,
    pub final_decision: String,
    pub confidence: f64,
    pub dissent: Option<String>,
    pub escalated: bool,
    pub timestamp: DateTime<Utc>,
}

/// Per-bot task statistics computed from the task table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotTaskStats {
    pub bot_id: String,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub success_rate: f64,
    /// Mean confidence over completed tasks.
    pub avg_confidence: f64,
    /// The 10 most recent tasks, newest first.
    pub recent_tasks: Vec<RecentTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentTask {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub confidence: f64,
}

/// A stored tool output, fetched by its `ref://<id>` token.
#[derive(Debug, Clone)]
pub struct ToolOutputEntry {
    pub id: String,
    pub tool_name: String,
    pub full_output: String,
    pub context_summary: String,
    pub created_at: DateTime<Utc>,
    pub session_key: String,
    /// Incremented on every fetch.
    pub accessed_count: i64,
    pub char_count: i64,
}
