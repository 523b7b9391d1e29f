//! Task board with heartbeat-based liveness.
//!
//! Transitions are guarded by ownership and linearised behind the board
//! lock. A monitor loop declares agents dead when their last heartbeat is
//! older than the configured threshold and returns their tasks to
//! `pending`; the claim operation itself permits stealing from an expired
//! incumbent, so reassignment works even between monitor ticks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{error, info, warn};

use troupe_core::config::CoordinatorConfig;
use troupe_core::{AgentId, Task, TaskId, TaskStatus};
use troupe_store::CoordinatorStore;

use crate::audit::{AuditEventType, AuditSeverity, AuditTrail, EventDraft};
use crate::error::{CoordinatorError, Result};

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub monitor_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Completed/failed tasks older than this are dropped from the board.
    pub task_gc: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            task_gc: Duration::from_secs(3600),
        }
    }
}

impl From<&CoordinatorConfig> for LivenessConfig {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            monitor_interval: Duration::from_secs(config.monitor_interval_secs),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
            task_gc: Duration::from_secs(config.task_gc_secs),
        }
    }
}

/// In-memory board of active tasks, written through to the store on every
/// transition.
pub struct TaskBoard {
    store: Arc<CoordinatorStore>,
    audit: Arc<AuditTrail>,
    config: LivenessConfig,
    tasks: Mutex<HashMap<TaskId, Task>>,
    heartbeats: DashMap<AgentId, DateTime<Utc>>,
}

impl TaskBoard {
    pub fn new(store: Arc<CoordinatorStore>, audit: Arc<AuditTrail>, config: LivenessConfig) -> Self {
        Self {
            store,
            audit,
            config,
            tasks: Mutex::new(HashMap::new()),
            heartbeats: DashMap::new(),
        }
    }

    /// Record a liveness signal from an agent.
    pub fn heartbeat(&self, agent: &AgentId) {
        self.heartbeats.insert(agent.clone(), Utc::now());
    }

    pub fn last_heartbeat(&self, agent: &AgentId) -> Option<DateTime<Utc>> {
        self.heartbeats.get(agent).map(|e| *e.value())
    }

    fn heartbeat_expired(&self, agent: &AgentId, now: DateTime<Utc>) -> bool {
        match self.last_heartbeat(agent) {
            Some(beat) => {
                (now - beat).to_std().unwrap_or_default() > self.config.heartbeat_timeout
            }
            // never heard from: dead by definition
            None => true,
        }
    }

    /// Put a new task on the board in `pending`.
    pub fn submit(&self, mut task: Task) -> Result<Task> {
        task.status = TaskStatus::Pending;
        task.assigned_to = None;
        self.store.save_task(&task)?;
        self.tasks
            .lock()
            .unwrap()
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Claim a task.
    ///
    /// Idempotent for the incumbent. A foreign claim succeeds only when
    /// the task is pending or the incumbent's heartbeat has expired
    /// (stealing).
    pub fn claim(&self, task_id: &TaskId, agent: &AgentId) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = self.load_locked(&mut tasks, task_id)?;

        match task.status {
            TaskStatus::Pending => {
                task.assigned_to = Some(agent.clone());
                task.status = TaskStatus::Assigned;
            }
            TaskStatus::Assigned | TaskStatus::InProgress => {
                let owner = task.assigned_to.clone().unwrap_or_else(AgentId::team);
                if &owner == agent {
                    // re-claiming one's own task succeeds
                    let task = task.clone();
                    drop(tasks);
                    self.heartbeat(agent);
                    return Ok(task);
                }
                if !self.heartbeat_expired(&owner, Utc::now()) {
                    return Err(CoordinatorError::NotClaimable {
                        id: task_id.as_str().to_string(),
                        reason: format!("owned by live agent {owner}"),
                    });
                }
                info!(task = %task_id, from = %owner, to = %agent, "stealing task from expired agent");
                task.assigned_to = Some(agent.clone());
                task.status = TaskStatus::Assigned;
                task.started_at = None;
            }
            status => {
                return Err(CoordinatorError::NotClaimable {
                    id: task_id.as_str().to_string(),
                    reason: format!("status is {status}"),
                });
            }
        }

        let claimed = task.clone();
        self.store.save_task(&claimed)?;
        drop(tasks);

        self.heartbeat(agent);
        self.audit.log_event(
            AuditEventType::TaskAssigned,
            &format!("Task '{}' claimed by {agent}", claimed.title),
            EventDraft {
                task_id: Some(task_id.clone()),
                bot_ids: vec![agent.clone()],
                confidence: 0.8,
                ..Default::default()
            },
        );
        Ok(claimed)
    }

    /// Move a claimed task to `in_progress`. Caller must be the owner.
    pub fn start(&self, task_id: &TaskId, agent: &AgentId) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = self.load_locked(&mut tasks, task_id)?;
        check_owner(task, agent)?;

        match task.status {
            TaskStatus::Assigned => task.mark_started(),
            TaskStatus::InProgress => {}
            status => {
                return Err(CoordinatorError::InvalidTransition {
                    id: task_id.as_str().to_string(),
                    from: status.to_string(),
                    to: TaskStatus::InProgress.to_string(),
                });
            }
        }

        let started = task.clone();
        self.store.save_task(&started)?;
        drop(tasks);
        self.heartbeat(agent);
        Ok(started)
    }

    /// Complete a task. Caller must be the owner.
    pub fn complete(
        &self,
        task_id: &TaskId,
        agent: &AgentId,
        result: &str,
        confidence: f64,
    ) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = self.load_locked(&mut tasks, task_id)?;
        check_owner(task, agent)?;

        if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
            return Err(CoordinatorError::InvalidTransition {
                id: task_id.as_str().to_string(),
                from: task.status.to_string(),
                to: TaskStatus::Completed.to_string(),
            });
        }
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        task.mark_completed(result, confidence);

        let completed = task.clone();
        self.store.save_task(&completed)?;
        drop(tasks);

        self.audit.log_event(
            AuditEventType::TaskCompleted,
            &format!("Task '{}' completed by {agent}", completed.title),
            EventDraft {
                task_id: Some(task_id.clone()),
                bot_ids: vec![agent.clone()],
                reasoning: format!("Completed with confidence {:.0}%", confidence * 100.0),
                confidence,
                ..Default::default()
            },
        );
        Ok(completed)
    }

    /// Fail a task. Caller must be the owner. Confidence drops to zero.
    pub fn fail(&self, task_id: &TaskId, agent: &AgentId, error_text: &str) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = self.load_locked(&mut tasks, task_id)?;
        check_owner(task, agent)?;

        task.mark_failed(error_text);
        let failed = task.clone();
        self.store.save_task(&failed)?;
        drop(tasks);

        self.audit.log_event(
            AuditEventType::TaskFailed,
            &format!("Task '{}' failed", failed.title),
            EventDraft {
                task_id: Some(task_id.clone()),
                bot_ids: vec![agent.clone()],
                reasoning: format!("Task failed with error: {error_text}"),
                severity: AuditSeverity::Error,
                confidence: 1.0,
                ..Default::default()
            },
        );
        Ok(failed)
    }

    /// Cancel a non-terminal task.
    pub fn cancel(&self, task_id: &TaskId) -> Result<Task> {
        self.terminate(task_id, TaskStatus::Cancelled)
    }

    /// Declare a task timed out (terminal), e.g. when the coordinator
    /// gives up on reassignment.
    pub fn expire(&self, task_id: &TaskId) -> Result<Task> {
        self.terminate(task_id, TaskStatus::Timeout)
    }

    fn terminate(&self, task_id: &TaskId, status: TaskStatus) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = self.load_locked(&mut tasks, task_id)?;
        if task.status.is_terminal() {
            return Err(CoordinatorError::InvalidTransition {
                id: task_id.as_str().to_string(),
                from: task.status.to_string(),
                to: status.to_string(),
            });
        }
        task.status = status;
        task.completed_at = Some(Utc::now());
        if status == TaskStatus::Timeout {
            task.confidence = 0.0;
        }
        let updated = task.clone();
        self.store.save_task(&updated)?;
        Ok(updated)
    }

    /// Attach learnings and follow-ups to a task after completion.
    pub fn annotate(
        &self,
        task_id: &TaskId,
        learnings: Vec<String>,
        follow_ups: Vec<String>,
    ) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = self.load_locked(&mut tasks, task_id)?;
        task.learnings = learnings;
        task.follow_ups = follow_ups;
        let updated = task.clone();
        self.store.save_task(&updated)?;
        Ok(updated)
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        if let Some(task) = self.tasks.lock().unwrap().get(task_id) {
            return Some(task.clone());
        }
        self.store.get_task(task_id).ok().flatten()
    }

    /// One liveness pass: every assigned/in-progress task whose owner's
    /// heartbeat has expired goes back to `pending` with the assignee
    /// cleared. Returns the affected task ids.
    pub fn check_liveness(&self) -> Vec<TaskId> {
        let now = Utc::now();
        let mut reassigned = Vec::new();
        let mut dead_events = Vec::new();

        {
            let mut tasks = self.tasks.lock().unwrap();
            for task in tasks.values_mut() {
                if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
                    continue;
                }
                let Some(owner) = task.assigned_to.clone() else {
                    continue;
                };
                if !self.heartbeat_expired(&owner, now) {
                    continue;
                }

                warn!(task = %task.id, agent = %owner, "heartbeat expired, returning task to pending");
                task.status = TaskStatus::Pending;
                task.assigned_to = None;
                task.started_at = None;

                if let Err(e) = self.store.save_task(task) {
                    error!(task = %task.id, error = %e, "failed to persist reassignment");
                }
                reassigned.push(task.id.clone());
                dead_events.push((task.id.clone(), owner, task.title.clone()));
            }
        }

        // audit after the state change it records
        for (task_id, owner, title) in dead_events {
            self.audit.log_event(
                AuditEventType::TaskFailed,
                &format!("Task '{title}' reassigned after heartbeat timeout"),
                EventDraft {
                    task_id: Some(task_id),
                    bot_ids: vec![owner],
                    reasoning: "Owner heartbeat exceeded the liveness threshold".to_string(),
                    severity: AuditSeverity::Error,
                    confidence: 1.0,
                    ..Default::default()
                },
            );
        }
        reassigned
    }

    /// Drop terminal tasks older than the GC window from the board. The
    /// store keeps their history.
    pub fn gc(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.task_gc).unwrap_or(chrono::Duration::hours(1));
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, t| {
            !(t.status.is_terminal() && t.completed_at.is_some_and(|done| done < cutoff))
        });
        before - tasks.len()
    }

    /// Monitor loop: liveness check plus GC at the configured cadence,
    /// until `shutdown` broadcasts true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.monitor_interval.as_secs_f64(),
            timeout_secs = self.config.heartbeat_timeout.as_secs_f64(),
            "liveness monitor started"
        );
        let mut interval = tokio::time::interval(self.config.monitor_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reassigned = self.check_liveness();
                    if !reassigned.is_empty() {
                        info!(count = reassigned.len(), "tasks returned to pending by liveness monitor");
                    }
                    self.gc();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("liveness monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn load_locked<'a>(
        &self,
        tasks: &'a mut HashMap<TaskId, Task>,
        task_id: &TaskId,
    ) -> Result<&'a mut Task> {
        if !tasks.contains_key(task_id) {
            let from_store =
                self.store
                    .get_task(task_id)?
                    .ok_or_else(|| CoordinatorError::TaskNotFound {
                        id: task_id.as_str().to_string(),
                    })?;
            tasks.insert(task_id.clone(), from_store);
        }
        Ok(tasks.get_mut(task_id).expect("inserted above"))
    }
}

fn check_owner(task: &Task, agent: &AgentId) -> Result<()> {
    match &task.assigned_to {
        Some(owner) if owner == agent => Ok(()),
        Some(owner) => Err(CoordinatorError::NotTaskOwner {
            id: task.id.as_str().to_string(),
            owner: owner.as_str().to_string(),
        }),
        None => Err(CoordinatorError::NotTaskOwner {
            id: task.id.as_str().to_string(),
            owner: "nobody".to_string(),
        }),
    }
}
