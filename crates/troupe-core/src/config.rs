use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Assisted-classifier hard deadline per attempt.
pub const DEFAULT_CLASSIFY_TIMEOUT_MS: u64 = 500;
/// Liveness monitor cadence.
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 5;
/// Heartbeat age after which an agent is declared dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 15;
/// Completed/failed tasks older than this are garbage-collected.
pub const DEFAULT_TASK_GC_SECS: u64 = 3600;
/// Dashboard metrics poll cadence.
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 5;

/// Top-level config (troupe.toml + TROUPE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TroupeConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Hard deadline for each assisted-classification attempt.
    #[serde(default = "default_classify_timeout_ms")]
    pub timeout_ms: u64,
    /// How many recent messages the sticky router inspects.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Layer-1 simple decisions at or above this confidence interrupt
    /// sticky state without mutating it.
    #[serde(default = "default_downgrade_confidence")]
    pub downgrade_confidence: f64,
    /// Primary remote model for assisted classification.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    /// Secondary model tried on primary timeout/error.
    pub secondary_classifier_model: Option<String>,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_classify_timeout_ms(),
            context_window: default_context_window(),
            downgrade_confidence: default_downgrade_confidence(),
            classifier_model: default_classifier_model(),
            secondary_classifier_model: None,
            calibration: CalibrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Minimum hours between calibration runs.
    #[serde(default = "default_calibration_interval_hours")]
    pub interval_hours: u64,
    /// New records required before the interval gate relaxes.
    #[serde(default = "default_min_classifications")]
    pub min_classifications: usize,
    /// Pattern set is trimmed to this size after ranking.
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
    /// Snapshot the prior patterns file before writing a new one.
    #[serde(default = "bool_true")]
    pub backup_before_calibration: bool,
    /// Effectiveness score weights. Success rate dominates; usage volume
    /// saturates at 20 observations.
    #[serde(default = "default_success_weight")]
    pub success_weight: f64,
    #[serde(default = "default_usage_weight")]
    pub usage_weight: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_calibration_interval_hours(),
            min_classifications: default_min_classifications(),
            max_patterns: default_max_patterns(),
            backup_before_calibration: true,
            success_weight: default_success_weight(),
            usage_weight: default_usage_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_task_gc_secs")]
    pub task_gc_secs: u64,
    /// Share of identical positions required to call consensus.
    #[serde(default = "default_required_agreement")]
    pub required_agreement: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            task_gc_secs: default_task_gc_secs(),
            required_agreement: default_required_agreement(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Directory holding one JSON document per room plus the channel index.
    #[serde(default = "default_rooms_dir")]
    pub dir: String,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            dir: default_rooms_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_metrics_interval_secs(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_classify_timeout_ms() -> u64 {
    DEFAULT_CLASSIFY_TIMEOUT_MS
}
fn default_context_window() -> usize {
    5
}
fn default_downgrade_confidence() -> f64 {
    0.9
}
fn default_classifier_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_calibration_interval_hours() -> u64 {
    24
}
fn default_min_classifications() -> usize {
    50
}
fn default_max_patterns() -> usize {
    100
}
fn default_success_weight() -> f64 {
    0.7
}
fn default_usage_weight() -> f64 {
    0.3
}
fn default_monitor_interval_secs() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}
fn default_heartbeat_timeout_secs() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_SECS
}
fn default_task_gc_secs() -> u64 {
    DEFAULT_TASK_GC_SECS
}
fn default_required_agreement() -> f64 {
    0.8
}
fn default_metrics_interval_secs() -> u64 {
    DEFAULT_METRICS_INTERVAL_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.troupe/troupe.db")
}
fn default_rooms_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.troupe/rooms")
}

impl TroupeConfig {
    /// Load config from a TOML file with TROUPE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.troupe/troupe.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TroupeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TROUPE_").split("_"))
            .extract()
            .map_err(|e| crate::error::TroupeError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.troupe/troupe.toml")
}
