//! Feedback capture for the calibration loop.
//!
//! Every processed message writes one [`ClassificationRecord`]; a rolling
//! window of the most recent 1000 is retained and persisted to
//! `routing_stats.json`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use troupe_core::config::CalibrationConfig;
use troupe_core::RoutingTier;

use crate::error::Result;
use crate::models::{ActionType, ClassificationScores, Layer, QuestionType, RoutingDecision};

/// Rolling record cap.
const MAX_RECORDS: usize = 1000;

/// One classification with the full context needed for later analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub content_preview: String,
    pub client_tier: RoutingTier,
    pub client_confidence: f64,
    pub llm_tier: Option<RoutingTier>,
    pub llm_confidence: f64,
    pub final_tier: RoutingTier,
    pub layer_used: Layer,

    pub action_type: ActionType,
    pub has_negations: bool,
    pub negations: Vec<String>,
    pub question_type: Option<QuestionType>,
    pub code_presence: f64,
    pub simple_indicators: f64,
    pub technical_terms: f64,
    pub social_interaction: f64,

    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub was_calibration: bool,
}

impl ClassificationRecord {
    /// Build a record from the Layer-1 decision, the optional assisted
    /// decision, and the final verdict handed to the caller.
    pub fn capture(
        content: &str,
        client: &RoutingDecision,
        assisted: Option<&RoutingDecision>,
        final_decision: &RoutingDecision,
        scores: &ClassificationScores,
    ) -> Self {
        Self {
            content_preview: content.chars().take(100).collect(),
            client_tier: client.tier,
            client_confidence: client.confidence,
            llm_tier: assisted.map(|d| d.tier),
            llm_confidence: assisted.map(|d| d.confidence).unwrap_or(0.0),
            final_tier: final_decision.tier,
            layer_used: final_decision.layer,
            action_type: scores.action_type,
            has_negations: scores.has_negations(),
            negations: scores.negations.clone(),
            question_type: scores.question_type,
            code_presence: scores.code_presence,
            simple_indicators: scores.simple_indicators,
            technical_terms: scores.technical_terms,
            social_interaction: scores.social_interaction,
            timestamp: Utc::now(),
            was_calibration: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct StatsFile {
    classifications: Vec<ClassificationRecord>,
    last_calibration: Option<DateTime<Utc>>,
    total_count: usize,
}

struct State {
    classifications: VecDeque<ClassificationRecord>,
    last_calibration: Option<DateTime<Utc>>,
}

/// Owner of the routing analytics file. All mutation goes through this
/// object; it is created once at startup.
pub struct RoutingAnalytics {
    stats_file: PathBuf,
    state: Mutex<State>,
}

impl RoutingAnalytics {
    /// Load analytics from `stats_file`, starting empty when the file is
    /// missing or unreadable.
    pub fn load(stats_file: impl AsRef<Path>) -> Self {
        let stats_file = stats_file.as_ref().to_path_buf();
        let loaded = std::fs::read_to_string(&stats_file)
            .ok()
            .and_then(|raw| serde_json::from_str::<StatsFile>(&raw).ok())
            .unwrap_or_default();

        Self {
            stats_file,
            state: Mutex::new(State {
                classifications: loaded.classifications.into(),
                last_calibration: loaded.last_calibration,
            }),
        }
    }

    pub fn record(&self, record: ClassificationRecord) {
        let mut state = self.state.lock().unwrap();
        state.classifications.push_back(record);
        while state.classifications.len() > MAX_RECORDS {
            state.classifications.pop_front();
        }
    }

    pub fn records(&self) -> Vec<ClassificationRecord> {
        self.state
            .lock()
            .unwrap()
            .classifications
            .iter()
            .cloned()
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().classifications.len()
    }

    pub fn last_calibration(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_calibration
    }

    pub fn mark_calibrated(&self, at: DateTime<Utc>) {
        self.state.lock().unwrap().last_calibration = Some(at);
    }

    /// Calibration gate: enough time elapsed, or enough new records since
    /// the last run.
    pub fn should_calibrate(&self, config: &CalibrationConfig) -> bool {
        let state = self.state.lock().unwrap();
        if state.classifications.is_empty() {
            return false;
        }
        let Some(last) = state.last_calibration else {
            return true;
        };

        let elapsed = Utc::now() - last;
        if elapsed < chrono::Duration::hours(config.interval_hours as i64) {
            let since = state
                .classifications
                .iter()
                .filter(|c| c.timestamp > last)
                .count();
            if since < config.min_classifications {
                return false;
            }
        }
        true
    }

    /// Persist the rolling window. Failures are logged, not raised — losing
    /// analytics must never break message routing.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            warn!(error = %e, "failed to persist routing analytics");
        }
    }

    fn try_save(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        let file = StatsFile {
            classifications: state.classifications.iter().cloned().collect(),
            last_calibration: state.last_calibration,
            total_count: state.classifications.len(),
        };
        drop(state);

        if let Some(parent) = self.stats_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.stats_file.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        std::fs::rename(&tmp, &self.stats_file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record_at(hours_ago: i64, tier: RoutingTier) -> ClassificationRecord {
        ClassificationRecord {
            content_preview: "x".to_string(),
            client_tier: tier,
            client_confidence: 0.8,
            llm_tier: Some(tier),
            llm_confidence: 0.9,
            final_tier: tier,
            layer_used: Layer::Client,
            action_type: ActionType::General,
            has_negations: false,
            negations: Vec::new(),
            question_type: None,
            code_presence: 0.0,
            simple_indicators: 0.0,
            technical_terms: 0.0,
            social_interaction: 0.0,
            timestamp: Utc::now() - chrono::Duration::hours(hours_ago),
            was_calibration: false,
        }
    }

    #[test]
    fn rolling_window_caps_at_1000() {
        let dir = TempDir::new().unwrap();
        let analytics = RoutingAnalytics::load(dir.path().join("routing_stats.json"));
        for _ in 0..1100 {
            analytics.record(record_at(0, RoutingTier::Medium));
        }
        assert_eq!(analytics.record_count(), 1000);
    }

    #[test]
    fn stats_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routing_stats.json");
        {
            let analytics = RoutingAnalytics::load(&path);
            analytics.record(record_at(1, RoutingTier::Coding));
            analytics.mark_calibrated(Utc::now());
            analytics.save();
        }
        let analytics = RoutingAnalytics::load(&path);
        assert_eq!(analytics.record_count(), 1);
        assert!(analytics.last_calibration().is_some());
    }

    #[test]
    fn gate_requires_records() {
        let dir = TempDir::new().unwrap();
        let analytics = RoutingAnalytics::load(dir.path().join("s.json"));
        let cfg = CalibrationConfig::default();
        assert!(!analytics.should_calibrate(&cfg));

        analytics.record(record_at(0, RoutingTier::Medium));
        // never calibrated -> go
        assert!(analytics.should_calibrate(&cfg));
    }

    #[test]
    fn gate_blocks_recent_calibration_with_few_new_records() {
        let dir = TempDir::new().unwrap();
        let analytics = RoutingAnalytics::load(dir.path().join("s.json"));
        let cfg = CalibrationConfig::default();

        analytics.record(record_at(2, RoutingTier::Medium));
        analytics.mark_calibrated(Utc::now() - chrono::Duration::hours(1));
        // one stale record since last calibration, interval not elapsed
        assert!(!analytics.should_calibrate(&cfg));

        // 50 fresh records open the gate
        for _ in 0..50 {
            analytics.record(record_at(0, RoutingTier::Medium));
        }
        assert!(analytics.should_calibrate(&cfg));
    }
}
