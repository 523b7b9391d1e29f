//! Autonomous team layer: progress monitoring, follow-up task
//! suggestions, bottleneck detection, and volunteered assistance, all
//! without explicit orchestration.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use troupe_bus::AgentBus;
use troupe_core::{AgentId, AgentMessage, MessageType, Task, TaskStatus};
use troupe_store::CoordinatorStore;

use crate::error::Result;
use crate::expertise::ExpertiseSource;

/// Tasks in progress longer than this are flagged as bottlenecks.
const STALLED_SECS: i64 = 7200;
/// Failures fresher than this are flagged for a retry offer.
const RECENT_FAILURE_SECS: i64 = 300;
/// Expertise below this never triggers a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.75;
/// Per-bot cap on open suggestions.
const MAX_SUGGESTIONS_PER_BOT: u64 = 5;

/// Snapshot of team-wide task statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamProgress {
    pub active_bots: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub in_progress_tasks: usize,
    pub failed_tasks: usize,
    pub pending_tasks: usize,
    pub success_rate: f64,
    pub avg_confidence: f64,
    /// Tasks completed in the last hour.
    pub velocity_per_hour: usize,
    pub suggestions_made: BTreeMap<String, u64>,
}

/// A detected workflow bottleneck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub task_id: String,
    pub task_title: String,
    pub assigned_to: Option<String>,
    pub issue: String,
    pub suggestion: String,
}

struct Inner {
    active_bots: Vec<AgentId>,
    suggestions_made: BTreeMap<String, u64>,
}

/// Self-organisation over the shared task store and bus.
pub struct AutonomousTeam {
    bus: Arc<AgentBus>,
    store: Arc<CoordinatorStore>,
    expertise: Arc<dyn ExpertiseSource>,
    inner: Mutex<Inner>,
}

impl AutonomousTeam {
    pub fn new(
        bus: Arc<AgentBus>,
        store: Arc<CoordinatorStore>,
        expertise: Arc<dyn ExpertiseSource>,
    ) -> Self {
        Self {
            bus,
            store,
            expertise,
            inner: Mutex::new(Inner {
                active_bots: Vec::new(),
                suggestions_made: BTreeMap::new(),
            }),
        }
    }

    pub fn register_bot(&self, bot: AgentId) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.active_bots.contains(&bot) {
            info!(bot = %bot, "bot joined autonomous team");
            inner.active_bots.push(bot);
        }
    }

    pub fn active_bots(&self) -> Vec<AgentId> {
        self.inner.lock().unwrap().active_bots.clone()
    }

    /// Team-wide task statistics from the store.
    pub fn monitor_progress(&self) -> Result<TeamProgress> {
        let completed = self.store.get_tasks_by_status(TaskStatus::Completed, 100)?;
        let in_progress = self.store.get_tasks_by_status(TaskStatus::InProgress, 100)?;
        let failed = self.store.get_tasks_by_status(TaskStatus::Failed, 100)?;
        let pending = self.store.get_tasks_by_status(TaskStatus::Pending, 100)?;

        let total = completed.len() + in_progress.len() + failed.len() + pending.len();
        let avg_confidence = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|t| t.confidence).sum::<f64>() / completed.len() as f64
        };

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let velocity = completed
            .iter()
            .filter(|t| t.completed_at.is_some_and(|done| done > hour_ago))
            .count();

        let inner = self.inner.lock().unwrap();
        Ok(TeamProgress {
            active_bots: inner.active_bots.len(),
            total_tasks: total,
            completed_tasks: completed.len(),
            in_progress_tasks: in_progress.len(),
            failed_tasks: failed.len(),
            pending_tasks: pending.len(),
            success_rate: if total > 0 {
                completed.len() as f64 / total as f64
            } else {
                0.0
            },
            avg_confidence,
            velocity_per_hour: velocity,
            suggestions_made: inner.suggestions_made.clone(),
        })
    }

    /// Turn recorded follow-ups of completed tasks into suggested tasks,
    /// routed to the best-scoring available bot.
    pub fn suggest_tasks(&self) -> Result<Vec<(AgentId, Task)>> {
        let completed = self.store.get_tasks_by_status(TaskStatus::Completed, 20)?;
        let mut suggestions = Vec::new();
        let mut already_suggested: HashSet<String> = HashSet::new();

        for task in &completed {
            for follow_up in &task.follow_ups {
                if !already_suggested.insert(follow_up.clone()) {
                    continue;
                }
                let title: String = follow_up.chars().take(50).collect();
                let mut suggested = Task::new(
                    &format!("Follow-up: {title}"),
                    follow_up,
                    &task.domain,
                );
                suggested.parent_task_id = Some(task.id.clone());
                suggested.created_by = Some(AgentId::team());

                let Some(best) = self.best_bot_for(&suggested) else {
                    continue;
                };

                {
                    let mut inner = self.inner.lock().unwrap();
                    *inner
                        .suggestions_made
                        .entry(best.as_str().to_string())
                        .or_default() += 1;
                }

                self.bus.publish(
                    AgentMessage::new(
                        AgentId::team(),
                        best.clone(),
                        MessageType::Request,
                        &format!("Suggested task: {}", suggested.title),
                    )
                    .with_context("task_id", serde_json::json!(suggested.id.as_str()))
                    .with_context("source", serde_json::json!("auto_suggestion")),
                );
                info!(bot = %best, title = %suggested.title, "follow-up task suggested");
                suggestions.push((best, suggested));
            }
        }
        Ok(suggestions)
    }

    /// Flag stalled work and fresh failures.
    pub fn detect_bottlenecks(&self) -> Result<Vec<Bottleneck>> {
        let now = Utc::now();
        let mut bottlenecks = Vec::new();

        for task in self.store.get_tasks_by_status(TaskStatus::InProgress, 50)? {
            let Some(started) = task.started_at else {
                continue;
            };
            let elapsed = (now - started).num_seconds();
            if elapsed > STALLED_SECS {
                let assignee = task
                    .assigned_to
                    .as_ref()
                    .map(|a| a.as_str().to_string())
                    .unwrap_or_else(|| "nobody".to_string());
                bottlenecks.push(Bottleneck {
                    task_id: task.id.as_str().to_string(),
                    task_title: task.title.clone(),
                    assigned_to: task.assigned_to.as_ref().map(|a| a.as_str().to_string()),
                    issue: "Task taking longer than expected".to_string(),
                    suggestion: format!("Consider offering assistance to {assignee}"),
                });
            }
        }

        for task in self.store.get_tasks_by_status(TaskStatus::Failed, 20)? {
            let recent = task
                .completed_at
                .is_some_and(|done| (now - done).num_seconds() < RECENT_FAILURE_SECS);
            if recent {
                let assignee = task
                    .assigned_to
                    .as_ref()
                    .map(|a| a.as_str().to_string())
                    .unwrap_or_else(|| "nobody".to_string());
                bottlenecks.push(Bottleneck {
                    task_id: task.id.as_str().to_string(),
                    task_title: task.title.clone(),
                    assigned_to: task.assigned_to.as_ref().map(|a| a.as_str().to_string()),
                    issue: "Recent task failure".to_string(),
                    suggestion: format!("Offer alternative approach to {assignee}"),
                });
            }
        }
        Ok(bottlenecks)
    }

    /// A bot volunteers to help: finds an in-progress task in a domain it
    /// knows and sends the owner an offer.
    pub fn volunteer_assistance(&self, helper: &AgentId) -> Result<Option<Task>> {
        for task in self.store.get_tasks_by_status(TaskStatus::InProgress, 10)? {
            let score = self.expertise.expertise_score(helper, &task.domain);
            if score <= 0.5 {
                continue;
            }
            let Some(owner) = task.assigned_to.clone() else {
                continue;
            };
            self.bus.publish(
                AgentMessage::new(
                    helper.clone(),
                    owner,
                    MessageType::Request,
                    &format!(
                        "I can help you with '{}'. I have {:.0}% expertise in {}.",
                        task.title,
                        score * 100.0,
                        task.domain
                    ),
                )
                .with_context("task_id", serde_json::json!(task.id.as_str()))
                .with_context("offer_type", serde_json::json!("collaboration")),
            );
            info!(helper = %helper, task = %task.title, "assistance volunteered");
            return Ok(Some(task));
        }
        Ok(None)
    }

    /// Rendered status report.
    pub fn report(&self) -> Result<String> {
        let progress = self.monitor_progress()?;
        let mut lines = vec![
            "=== AUTONOMOUS TEAM STATUS REPORT ===".to_string(),
            format!("Active Bots: {}", progress.active_bots),
            String::new(),
            "Task Statistics:".to_string(),
            format!("  Total: {}", progress.total_tasks),
            format!("  Completed: {}", progress.completed_tasks),
            format!("  In Progress: {}", progress.in_progress_tasks),
            format!("  Failed: {}", progress.failed_tasks),
            format!("  Pending: {}", progress.pending_tasks),
            String::new(),
            "Performance Metrics:".to_string(),
            format!("  Success Rate: {:.1}%", progress.success_rate * 100.0),
            format!("  Avg Confidence: {:.2}", progress.avg_confidence),
            format!("  Team Velocity: {} tasks/hour", progress.velocity_per_hour),
        ];

        let bottlenecks = self.detect_bottlenecks()?;
        if !bottlenecks.is_empty() {
            lines.push(String::new());
            lines.push("Detected Bottlenecks:".to_string());
            for bn in bottlenecks.iter().take(3) {
                lines.push(format!("  - {}: {}", bn.task_title, bn.issue));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Best bot for a suggested task, discounted by how loaded each bot
    /// already is with suggestions.
    fn best_bot_for(&self, task: &Task) -> Option<AgentId> {
        let inner = self.inner.lock().unwrap();
        let mut best: Option<(AgentId, f64)> = None;
        for bot in &inner.active_bots {
            let score = self.expertise.expertise_score(bot, &task.domain);
            let load = inner
                .suggestions_made
                .get(bot.as_str())
                .copied()
                .unwrap_or(0)
                .min(MAX_SUGGESTIONS_PER_BOT);
            let workload_factor = 1.0 - load as f64 / MAX_SUGGESTIONS_PER_BOT as f64;
            let adjusted = score * workload_factor;
            if best.as_ref().map_or(true, |(_, s)| adjusted > *s) {
                best = Some((bot.clone(), adjusted));
            }
        }
        best.filter(|(_, score)| *score > SUGGESTION_THRESHOLD)
            .map(|(bot, _)| bot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expertise::StaticExpertise;
    use rusqlite::Connection;

    fn team(expertise: StaticExpertise) -> (Arc<CoordinatorStore>, Arc<AgentBus>, AutonomousTeam) {
        let store = Arc::new(CoordinatorStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let bus = Arc::new(AgentBus::default());
        bus.register_agent(AgentId::new("coder"), "Coder", "development");
        bus.register_agent(AgentId::new("researcher"), "Researcher", "research");
        let team = AutonomousTeam::new(bus.clone(), store.clone(), Arc::new(expertise));
        team.register_bot(AgentId::new("coder"));
        team.register_bot(AgentId::new("researcher"));
        (store, bus, team)
    }

    #[test]
    fn progress_reflects_store_contents() {
        let (store, _bus, team) = team(StaticExpertise::new(0.5));
        let mut done = Task::new("done", "d", "development");
        done.mark_started();
        done.mark_completed("ok", 0.8);
        store.save_task(&done).unwrap();
        store.save_task(&Task::new("open", "d", "research")).unwrap();

        let progress = team.monitor_progress().unwrap();
        assert_eq!(progress.total_tasks, 2);
        assert_eq!(progress.completed_tasks, 1);
        assert_eq!(progress.pending_tasks, 1);
        assert!((progress.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(progress.velocity_per_hour, 1);
    }

    #[test]
    fn follow_ups_become_suggestions_for_the_expert() {
        let mut expertise = StaticExpertise::new(0.1);
        expertise.set("coder", "development", 0.9);
        let (store, bus, team) = team(expertise);

        let mut done = Task::new("ship feature", "d", "development");
        done.mark_started();
        done.mark_completed("ok", 0.9);
        done.follow_ups.push("add regression tests".to_string());
        store.save_task(&done).unwrap();

        let suggestions = team.suggest_tasks().unwrap();
        assert_eq!(suggestions.len(), 1);
        let (bot, task) = &suggestions[0];
        assert_eq!(bot, &AgentId::new("coder"));
        assert!(task.title.starts_with("Follow-up:"));
        assert_eq!(task.parent_task_id, Some(done.id.clone()));

        let inbox = bus.inbox(&AgentId::new("coder"));
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].content.contains("Suggested task"));
    }

    #[test]
    fn low_expertise_suppresses_suggestions() {
        let (store, _bus, team) = team(StaticExpertise::new(0.2));
        let mut done = Task::new("t", "d", "development");
        done.mark_started();
        done.mark_completed("ok", 0.9);
        done.follow_ups.push("more work".to_string());
        store.save_task(&done).unwrap();

        assert!(team.suggest_tasks().unwrap().is_empty());
    }

    #[test]
    fn stalled_and_fresh_failures_are_bottlenecks() {
        let (store, _bus, team) = team(StaticExpertise::new(0.5));

        let mut stalled = Task::new("slow", "d", "development");
        stalled.assigned_to = Some(AgentId::new("coder"));
        stalled.status = TaskStatus::InProgress;
        stalled.started_at = Some(Utc::now() - chrono::Duration::hours(3));
        store.save_task(&stalled).unwrap();

        let mut failed = Task::new("broken", "d", "development");
        failed.assigned_to = Some(AgentId::new("coder"));
        failed.mark_started();
        failed.mark_failed("boom");
        store.save_task(&failed).unwrap();

        let bottlenecks = team.detect_bottlenecks().unwrap();
        assert_eq!(bottlenecks.len(), 2);
        assert!(bottlenecks.iter().any(|b| b.issue.contains("longer than expected")));
        assert!(bottlenecks.iter().any(|b| b.issue.contains("Recent task failure")));
    }

    #[test]
    fn volunteer_finds_matching_in_progress_task() {
        let mut expertise = StaticExpertise::new(0.1);
        expertise.set("researcher", "development", 0.8);
        let (store, bus, team) = team(expertise);

        let mut task = Task::new("hard problem", "d", "development");
        task.assigned_to = Some(AgentId::new("coder"));
        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        store.save_task(&task).unwrap();

        let helped = team
            .volunteer_assistance(&AgentId::new("researcher"))
            .unwrap();
        assert!(helped.is_some());
        let inbox = bus.inbox(&AgentId::new("coder"));
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].content.contains("I can help you"));
    }
}
