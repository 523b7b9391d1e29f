use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of one bot's heartbeat loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotHealth {
    pub name: String,
    pub running: bool,
    pub total_ticks: u64,
    pub failed_ticks: u64,
    pub success_rate: f64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Aggregate team health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamHealth {
    pub overall_success_rate: f64,
    pub total_bots: usize,
    pub running_bots: usize,
    pub total_ticks_all_bots: u64,
    pub failed_ticks_all_bots: u64,
    pub bots: BTreeMap<String, BotHealth>,
    pub alerts: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// External collaborator: the heartbeat manager that drives per-bot tick
/// loops and aggregates their health.
pub trait TeamHealthSource: Send + Sync {
    fn team_health(&self) -> TeamHealth;
    fn bot(&self, name: &str) -> Option<BotHealth>;
}
