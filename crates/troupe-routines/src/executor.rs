//! Single dispatch path for fired routine jobs.
//!
//! Order of dispatch: calibration jobs, team heartbeat ticks, system-scope
//! routines through the coordinator-agent entry point, then user routines
//! with optional outbound delivery. Failures are caught per job and become
//! the job's result; the loop never halts.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::types::Job;

/// The router's calibration entry point. The router applies its own gate;
/// the executor just pulls the trigger.
pub trait CalibrationGate: Send + Sync {
    /// Returns a human-readable result line.
    fn run_calibration(&self) -> String;
}

/// Per-bot heartbeat entry point (the heartbeat manager collaborator).
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn tick(&self, bot: &str) -> Result<String, String>;
}

/// The agent entry point routine messages run through.
#[async_trait]
pub trait AgentEntry: Send + Sync {
    async fn process(
        &self,
        message: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
    ) -> Result<String, String>;
}

/// Outbound channel delivery (chat bridge collaborator).
#[async_trait]
pub trait OutboundPublisher: Send + Sync {
    async fn publish(&self, channel: &str, chat_id: &str, content: &str);
}

/// Executes routine jobs through a single, unified path.
pub struct RoutineExecutor {
    calibration: Option<Arc<dyn CalibrationGate>>,
    heartbeats: Option<Arc<dyn HeartbeatSink>>,
    agent: Arc<dyn AgentEntry>,
    outbound: Option<Arc<dyn OutboundPublisher>>,
}

impl RoutineExecutor {
    pub fn new(agent: Arc<dyn AgentEntry>) -> Self {
        Self {
            calibration: None,
            heartbeats: None,
            agent,
            outbound: None,
        }
    }

    pub fn with_calibration(mut self, gate: Arc<dyn CalibrationGate>) -> Self {
        self.calibration = Some(gate);
        self
    }

    pub fn with_heartbeats(mut self, sink: Arc<dyn HeartbeatSink>) -> Self {
        self.heartbeats = Some(sink);
        self
    }

    pub fn with_outbound(mut self, publisher: Arc<dyn OutboundPublisher>) -> Self {
        self.outbound = Some(publisher);
        self
    }

    /// Drain fired jobs until the channel closes.
    pub async fn run(self: Arc<Self>, mut fired_rx: mpsc::Receiver<Job>) {
        info!("routine executor started");
        while let Some(job) = fired_rx.recv().await {
            let result = self.handle_job(&job).await;
            match result {
                Some(outcome) => info!(job_id = %job.id, %outcome, "routine job handled"),
                None => info!(job_id = %job.id, "routine job handled (no output)"),
            }
        }
        info!("routine executor stopped");
    }

    /// Execute one job. Every failure is caught and surfaced as the job's
    /// result string.
    pub async fn handle_job(&self, job: &Job) -> Option<String> {
        // Calibration jobs (system jobs, not user messages)
        if job.is_calibration() {
            return Some(self.run_calibration(job));
        }

        // Team heartbeat tick (per-bot)
        if job.is_heartbeat_tick() {
            return self.run_heartbeat_tick(job).await;
        }

        // System routines run through the coordinator-agent entry point
        // with a synthetic session id.
        if job.payload.scope.as_deref() == Some("system") {
            return self.run_system_routine(job).await;
        }

        // User routines
        let response = self.run_user_routine(job).await;
        if job.payload.deliver {
            if let (Some(publisher), Some(to)) = (&self.outbound, &job.payload.to) {
                let channel = job.payload.channel.as_deref().unwrap_or("cli");
                publisher
                    .publish(channel, to, response.as_deref().unwrap_or(""))
                    .await;
            }
        }
        response
    }

    fn run_calibration(&self, job: &Job) -> String {
        let Some(gate) = &self.calibration else {
            warn!(job_id = %job.id, "calibration job fired but no router is wired");
            return "Calibration skipped: router not configured".to_string();
        };
        gate.run_calibration()
    }

    async fn run_heartbeat_tick(&self, job: &Job) -> Option<String> {
        let Some(sink) = &self.heartbeats else {
            warn!(job_id = %job.id, "heartbeat tick fired but no heartbeat manager is wired");
            return None;
        };
        let Some(bot) = job.payload.bot.as_deref().or(job.payload.to.as_deref()) else {
            warn!(job_id = %job.id, "heartbeat tick missing target bot");
            return None;
        };
        match sink.tick(bot).await {
            Ok(status) => Some(format!("Heartbeat tick completed for {bot} ({status})")),
            Err(e) => {
                error!(job_id = %job.id, bot, error = %e, "heartbeat tick failed");
                Some(format!("Heartbeat tick failed for {bot}: {e}"))
            }
        }
    }

    async fn run_system_routine(&self, job: &Job) -> Option<String> {
        let session_key = format!("routine_{}", job.id);
        let channel = job.payload.channel.as_deref().unwrap_or("internal");
        let chat_id = job.payload.to.as_deref().unwrap_or("team");
        match self
            .agent
            .process(&job.payload.message, &session_key, channel, chat_id)
            .await
        {
            Ok(response) => Some(response),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "system routine failed");
                Some(format!("System routine failed: {e}"))
            }
        }
    }

    async fn run_user_routine(&self, job: &Job) -> Option<String> {
        let session_key = format!("routine_{}", job.id);
        let channel = job.payload.channel.as_deref().unwrap_or("cli");
        let chat_id = job.payload.to.as_deref().unwrap_or("direct");
        match self
            .agent
            .process(&job.payload.message, &session_key, channel, chat_id)
            .await
        {
            Ok(response) => Some(response),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "user routine failed");
                Some(format!("Routine failed: {e}"))
            }
        }
    }
}
