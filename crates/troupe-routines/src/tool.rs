//! Schedule-management surface exposed to the agent tool layer and the
//! CLI.
//!
//! Validation failures are terminal strings prefixed with `Error:`; the
//! engine underneath is never touched on bad input.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::engine::SchedulerEngine;
use crate::schedule::{parse_tz, validate_cron};
use crate::types::{JobPayload, Schedule};

/// The supported actions.
#[derive(Debug, Clone)]
pub enum ScheduleAction {
    /// A reminder or task; requires `message` and exactly one schedule
    /// form.
    Add {
        message: String,
        every_seconds: Option<u64>,
        cron_expr: Option<String>,
        timezone: Option<String>,
        at: Option<String>,
    },
    /// Schedule routing calibration; defaults to daily at 2am.
    Calibrate {
        every_seconds: Option<u64>,
        cron_expr: Option<String>,
        timezone: Option<String>,
    },
    List,
    Remove {
        job_id: String,
    },
}

/// Tool wrapper around the scheduler engine, bound to a delivery context.
pub struct ScheduleTool {
    engine: Arc<SchedulerEngine>,
    channel: String,
    chat_id: String,
    default_timezone: String,
}

impl ScheduleTool {
    pub fn new(engine: Arc<SchedulerEngine>, default_timezone: &str) -> Self {
        Self {
            engine,
            channel: String::new(),
            chat_id: String::new(),
            default_timezone: default_timezone.to_string(),
        }
    }

    /// Bind the current session so reminders know where to deliver.
    pub fn set_context(&mut self, channel: &str, chat_id: &str) {
        self.channel = channel.to_string();
        self.chat_id = chat_id.to_string();
    }

    /// Execute one action; the returned string goes straight to the user.
    pub fn execute(&self, action: ScheduleAction) -> String {
        match action {
            ScheduleAction::Add {
                message,
                every_seconds,
                cron_expr,
                timezone,
                at,
            } => self.add_job(&message, every_seconds, cron_expr, timezone, at),
            ScheduleAction::Calibrate {
                every_seconds,
                cron_expr,
                timezone,
            } => self.add_calibration_job(every_seconds, cron_expr, timezone),
            ScheduleAction::List => self.list_jobs(),
            ScheduleAction::Remove { job_id } => self.remove_job(&job_id),
        }
    }

    fn add_job(
        &self,
        message: &str,
        every_seconds: Option<u64>,
        cron_expr: Option<String>,
        timezone: Option<String>,
        at: Option<String>,
    ) -> String {
        if message.is_empty() {
            return "Error: message is required for add".to_string();
        }
        if self.channel.is_empty() || self.chat_id.is_empty() {
            return "Error: no session context (channel/chat_id)".to_string();
        }
        if timezone.is_some() && cron_expr.is_none() {
            return "Error: timezone can only be used with cron_expr".to_string();
        }
        if let Some(tz) = &timezone {
            if parse_tz(tz).is_err() {
                return format!("Error: unknown timezone '{tz}'");
            }
        }

        let effective_tz = timezone.unwrap_or_else(|| self.default_timezone.clone());

        let (schedule, delete_after) = if let Some(secs) = every_seconds {
            (
                Schedule::Every {
                    every_ms: secs * 1000,
                },
                false,
            )
        } else if let Some(expr) = cron_expr {
            if let Err(e) = validate_cron(&expr, &effective_tz) {
                return format!("Error: {e}");
            }
            (
                Schedule::Cron {
                    expr,
                    tz: effective_tz,
                },
                false,
            )
        } else if let Some(at_str) = at {
            let Ok(dt) = NaiveDateTime::parse_from_str(&at_str, "%Y-%m-%dT%H:%M:%S") else {
                return format!("Error: unparseable datetime '{at_str}' (expected ISO 8601)");
            };
            (
                Schedule::At {
                    at_ms: dt.and_utc().timestamp_millis(),
                },
                true,
            )
        } else {
            return "Error: either every_seconds, cron_expr, or at is required".to_string();
        };

        let name: String = message.chars().take(30).collect();
        let payload = JobPayload {
            message: message.to_string(),
            deliver: true,
            channel: Some(self.channel.clone()),
            to: Some(self.chat_id.clone()),
            ..Default::default()
        };

        match self.engine.add_job(&name, schedule, payload, delete_after) {
            Ok(job) => format!(
                "Created reminder '{}' (id: {}). You'll receive this message as scheduled.",
                job.name, job.id
            ),
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Calibration is a system job: no user delivery, default schedule
    /// `0 2 * * *`.
    fn add_calibration_job(
        &self,
        every_seconds: Option<u64>,
        cron_expr: Option<String>,
        timezone: Option<String>,
    ) -> String {
        if let Some(tz) = &timezone {
            if parse_tz(tz).is_err() {
                return format!("Error: unknown timezone '{tz}'");
            }
        }
        let effective_tz = timezone.unwrap_or_else(|| self.default_timezone.clone());

        let (schedule, description) = if let Some(secs) = every_seconds {
            (
                Schedule::Every {
                    every_ms: secs * 1000,
                },
                describe_interval(secs),
            )
        } else {
            let expr = cron_expr.unwrap_or_else(|| "0 2 * * *".to_string());
            if let Err(e) = validate_cron(&expr, &effective_tz) {
                return format!("Error: {e}");
            }
            let description = if expr == "0 2 * * *" {
                "daily at 2:00 AM".to_string()
            } else {
                format!("on schedule '{expr}'")
            };
            (
                Schedule::Cron {
                    expr,
                    tz: effective_tz,
                },
                description,
            )
        };

        let payload = JobPayload {
            message: "CALIBRATE_ROUTING".to_string(),
            routine: Some("calibration".to_string()),
            deliver: false,
            channel: Some("internal".to_string()),
            to: Some("calibration".to_string()),
            ..Default::default()
        };

        match self
            .engine
            .add_job("Routing Calibration", schedule, payload, false)
        {
            Ok(job) => format!(
                "Scheduled routing calibration {description} (job id: {}). \
                 This optimizes message routing from classification history; \
                 improvements land gradually in the background.",
                job.id
            ),
            Err(e) => format!("Error: {e}"),
        }
    }

    fn list_jobs(&self) -> String {
        let jobs = match self.engine.list_jobs() {
            Ok(jobs) => jobs,
            Err(e) => return format!("Error: {e}"),
        };
        if jobs.is_empty() {
            return "No scheduled jobs.".to_string();
        }

        let (calibration, user): (Vec<_>, Vec<_>) = jobs.iter().partition(|j| j.is_calibration());

        let mut lines = Vec::new();
        if !user.is_empty() {
            lines.push("Your Reminders:".to_string());
            for job in &user {
                lines.push(format!(
                    "  - {} (id: {}, {})",
                    job.name,
                    job.id,
                    schedule_kind(&job.schedule)
                ));
            }
        }
        if !calibration.is_empty() {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push("System Calibration:".to_string());
            for job in &calibration {
                lines.push(format!(
                    "  - {} (id: {}, {})",
                    job.name,
                    job.id,
                    schedule_kind(&job.schedule)
                ));
            }
        }
        lines.join("\n")
    }

    fn remove_job(&self, job_id: &str) -> String {
        if job_id.is_empty() {
            return "Error: job_id is required for remove".to_string();
        }
        match self.engine.remove_job(job_id) {
            Ok(()) => format!("Removed job {job_id}"),
            Err(_) => format!("Job {job_id} not found"),
        }
    }
}

fn schedule_kind(schedule: &Schedule) -> &'static str {
    match schedule {
        Schedule::Every { .. } => "every",
        Schedule::Cron { .. } => "cron",
        Schedule::At { .. } => "at",
    }
}

fn describe_interval(secs: u64) -> String {
    if secs < 3600 {
        format!("every {secs} seconds")
    } else if secs < 86_400 {
        let hours = secs as f64 / 3600.0;
        if hours.fract() == 0.0 {
            format!("every {} hours", hours as u64)
        } else {
            format!("every {hours:.1} hours")
        }
    } else {
        let days = secs as f64 / 86_400.0;
        if days.fract() == 0.0 {
            format!("every {} days", days as u64)
        } else {
            format!("every {days:.1} days")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn tool() -> ScheduleTool {
        let engine =
            Arc::new(SchedulerEngine::new(Connection::open_in_memory().unwrap(), None).unwrap());
        let mut tool = ScheduleTool::new(engine, "UTC");
        tool.set_context("telegram", "chat-1");
        tool
    }

    #[test]
    fn add_requires_message_and_schedule() {
        let tool = tool();
        let out = tool.execute(ScheduleAction::Add {
            message: String::new(),
            every_seconds: None,
            cron_expr: None,
            timezone: None,
            at: None,
        });
        assert_eq!(out, "Error: message is required for add");

        let out = tool.execute(ScheduleAction::Add {
            message: "remind me".to_string(),
            every_seconds: None,
            cron_expr: None,
            timezone: None,
            at: None,
        });
        assert!(out.starts_with("Error: either every_seconds"));
    }

    #[test]
    fn add_rejects_unknown_timezone_and_orphan_timezone() {
        let tool = tool();
        let out = tool.execute(ScheduleAction::Add {
            message: "m".to_string(),
            every_seconds: None,
            cron_expr: Some("0 9 * * *".to_string()),
            timezone: Some("Mars/Olympus".to_string()),
            at: None,
        });
        assert_eq!(out, "Error: unknown timezone 'Mars/Olympus'");

        let out = tool.execute(ScheduleAction::Add {
            message: "m".to_string(),
            every_seconds: Some(60),
            cron_expr: None,
            timezone: Some("UTC".to_string()),
            at: None,
        });
        assert_eq!(out, "Error: timezone can only be used with cron_expr");
    }

    #[test]
    fn add_without_session_context_fails() {
        let engine =
            Arc::new(SchedulerEngine::new(Connection::open_in_memory().unwrap(), None).unwrap());
        let tool = ScheduleTool::new(engine, "UTC");
        let out = tool.execute(ScheduleAction::Add {
            message: "m".to_string(),
            every_seconds: Some(60),
            cron_expr: None,
            timezone: None,
            at: None,
        });
        assert_eq!(out, "Error: no session context (channel/chat_id)");
    }

    #[test]
    fn add_interval_reminder_succeeds() {
        let tool = tool();
        let out = tool.execute(ScheduleAction::Add {
            message: "drink water".to_string(),
            every_seconds: Some(3600),
            cron_expr: None,
            timezone: None,
            at: None,
        });
        assert!(out.starts_with("Created reminder 'drink water'"));

        let listing = tool.execute(ScheduleAction::List);
        assert!(listing.contains("Your Reminders:"));
        assert!(listing.contains("drink water"));
    }

    #[test]
    fn add_one_shot_parses_iso_datetime() {
        let tool = tool();
        let out = tool.execute(ScheduleAction::Add {
            message: "meeting".to_string(),
            every_seconds: None,
            cron_expr: None,
            timezone: None,
            at: Some("2099-02-12T10:30:00".to_string()),
        });
        assert!(out.starts_with("Created reminder"));

        let out = tool.execute(ScheduleAction::Add {
            message: "meeting".to_string(),
            every_seconds: None,
            cron_expr: None,
            timezone: None,
            at: Some("next tuesday".to_string()),
        });
        assert!(out.starts_with("Error: unparseable datetime"));
    }

    #[test]
    fn calibrate_defaults_to_daily_2am() {
        let tool = tool();
        let out = tool.execute(ScheduleAction::Calibrate {
            every_seconds: None,
            cron_expr: None,
            timezone: None,
        });
        assert!(out.contains("daily at 2:00 AM"));

        let listing = tool.execute(ScheduleAction::List);
        assert!(listing.contains("System Calibration:"));
        assert!(listing.contains("Routing Calibration"));
    }

    #[test]
    fn remove_requires_id_and_reports_missing() {
        let tool = tool();
        assert_eq!(
            tool.execute(ScheduleAction::Remove {
                job_id: String::new()
            }),
            "Error: job_id is required for remove"
        );
        assert_eq!(
            tool.execute(ScheduleAction::Remove {
                job_id: "nope".to_string()
            }),
            "Job nope not found"
        );
    }
}
