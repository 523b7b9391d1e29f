use serde::{Deserialize, Serialize};

/// When and how often a routine job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fixed interval in milliseconds.
    Every { every_ms: u64 },

    /// Cron expression evaluated in the named timezone.
    Cron { expr: String, tz: String },

    /// One-shot at an absolute epoch-millisecond instant. The job is
    /// deleted after firing.
    At { at_ms: i64 },
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// The scheduled window passed while the engine was offline.
    Missed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Missed => "missed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "missed" => Ok(Self::Missed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// What a fired job carries into the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    /// The message delivered or executed.
    pub message: String,
    /// System routine tag: "calibration" or "team_heartbeat".
    pub routine: Option<String>,
    /// "system" routes through the coordinator-agent entry point.
    pub scope: Option<String>,
    /// Deliver the agent response outbound when true.
    #[serde(default)]
    pub deliver: bool,
    /// Outbound channel kind (telegram, discord, cli, internal).
    pub channel: Option<String>,
    /// Outbound chat id / recipient.
    pub to: Option<String>,
    /// Target bot for heartbeat ticks.
    pub bot: Option<String>,
}

/// A persisted routine job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string.
    pub id: String,
    pub name: String,
    pub schedule: Schedule,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// RFC 3339, when the job last fired.
    pub last_run: Option<String>,
    /// RFC 3339, when the job next fires.
    pub next_run: Option<String>,
    pub run_count: u32,
    /// One-shot jobs are removed after firing.
    pub delete_after_run: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    /// Calibration jobs carry the marker message or the routine tag.
    pub fn is_calibration(&self) -> bool {
        self.payload.routine.as_deref() == Some("calibration")
            || self.payload.message == "CALIBRATE_ROUTING"
    }

    /// Team heartbeat ticks drive per-bot liveness work.
    pub fn is_heartbeat_tick(&self) -> bool {
        self.payload.routine.as_deref() == Some("team_heartbeat")
            || self.payload.message == "TEAM_HEARTBEAT_TICK"
    }
}
