//! Auto-calibration: rebuilds the routing pattern set and re-tunes
//! per-tier thresholds from accumulated classification records.
//!
//! The run is a fixed pipeline: accuracy analysis, confusion learning,
//! pattern generation from mismatch n-grams, a full stats replay, ranked
//! eviction, threshold sweeps, then backup-and-atomically-write the
//! patterns file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use troupe_core::config::CalibrationConfig;
use troupe_core::RoutingTier;

use crate::analytics::ClassificationRecord;
use crate::classifier::builtin_patterns;
use crate::error::Result;
use crate::models::{
    ActionType, PatternSource, PatternStats, PatternsFile, RoutingPattern,
};

/// Per-tier threshold change proposed by a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdAdjustment {
    pub old_threshold: f64,
    pub new_threshold: f64,
    pub accuracy: f64,
    pub sample_size: usize,
    /// Accuracy gain over the tier's unfiltered baseline.
    pub improvement: f64,
}

/// What one confusion pair taught us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionSummary {
    pub count: usize,
    pub common_ngrams: Vec<String>,
    pub dominant_action: ActionType,
    pub example: String,
}

/// Result of a calibration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub timestamp: chrono::DateTime<Utc>,
    pub classifications_analyzed: usize,
    pub matches: usize,
    pub accuracy: f64,
    pub mismatches_count: usize,
    pub tier_accuracy: BTreeMap<String, f64>,
    pub confusion_learning: BTreeMap<String, ConfusionSummary>,
    pub patterns_added: usize,
    pub patterns_removed: usize,
    pub total_patterns: usize,
    pub effective_patterns: usize,
    pub threshold_adjustments: BTreeMap<String, ThresholdAdjustment>,
    /// The surviving pattern set, ready to swap into the classifier.
    #[serde(skip)]
    pub patterns: Vec<RoutingPattern>,
}

/// Owns the patterns file and the calibration pipeline.
pub struct Calibrator {
    patterns_file: PathBuf,
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(patterns_file: impl AsRef<Path>, config: CalibrationConfig) -> Self {
        Self {
            patterns_file: patterns_file.as_ref().to_path_buf(),
            config,
        }
    }

    /// Load the persisted pattern set, falling back to the shipped set
    /// when the file is missing or unreadable.
    pub fn load_patterns(&self) -> Vec<RoutingPattern> {
        match std::fs::read_to_string(&self.patterns_file) {
            Ok(raw) => match serde_json::from_str::<PatternsFile>(&raw) {
                Ok(file) => file.patterns,
                Err(e) => {
                    warn!(error = %e, "patterns file unreadable, using builtin set");
                    builtin_patterns()
                }
            },
            Err(_) => builtin_patterns(),
        }
    }

    /// Run a full calibration over `records` with the router's current
    /// per-tier thresholds.
    pub fn calibrate(
        &self,
        records: &[ClassificationRecord],
        current_thresholds: &BTreeMap<RoutingTier, f64>,
    ) -> Result<CalibrationOutcome> {
        // 1. accuracy analysis
        let comparable: Vec<&ClassificationRecord> =
            records.iter().filter(|r| r.llm_tier.is_some()).collect();
        let matches = comparable
            .iter()
            .filter(|r| Some(r.client_tier) == r.llm_tier)
            .count();
        let mismatches: Vec<&ClassificationRecord> = comparable
            .iter()
            .filter(|r| Some(r.client_tier) != r.llm_tier)
            .copied()
            .collect();
        let accuracy = if records.is_empty() {
            0.0
        } else {
            matches as f64 / records.len() as f64
        };

        let mut tier_accuracy = BTreeMap::new();
        for tier in RoutingTier::all() {
            let tier_records: Vec<&&ClassificationRecord> = comparable
                .iter()
                .filter(|r| r.client_tier == tier)
                .collect();
            if !tier_records.is_empty() {
                let tier_matches = tier_records
                    .iter()
                    .filter(|r| Some(r.client_tier) == r.llm_tier)
                    .count();
                tier_accuracy.insert(
                    tier.to_string(),
                    tier_matches as f64 / tier_records.len() as f64,
                );
            }
        }

        // 2. confusion-pair learning
        let confusion_learning = learn_confusions(&mismatches);

        // 3. new patterns from mismatch n-grams
        let new_patterns = generate_patterns(&mismatches);

        // 4. full stats replay over existing + new patterns
        let mut patterns = self.load_patterns();
        let mut patterns_added = 0;
        for pattern in new_patterns {
            if patterns.len() < self.config.max_patterns {
                patterns.push(pattern);
                patterns_added += 1;
            }
        }
        replay_history(&mut patterns, records);

        // 5. ranked eviction down to max_patterns
        patterns.sort_by(|a, b| {
            let sa = a.effectiveness_score(self.config.success_weight, self.config.usage_weight);
            let sb = b.effectiveness_score(self.config.success_weight, self.config.usage_weight);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        let before_eviction = patterns.len();
        patterns.truncate(self.config.max_patterns);
        let patterns_removed = before_eviction - patterns.len();

        // 6. threshold sweeps
        let threshold_adjustments = sweep_thresholds(&comparable, current_thresholds);

        // 7. backup + atomic write
        if self.config.backup_before_calibration && self.patterns_file.exists() {
            self.backup_patterns();
        }
        self.save_patterns(&patterns, records.len())?;

        let effective_patterns = patterns.iter().filter(|p| p.is_effective()).count();
        let outcome = CalibrationOutcome {
            timestamp: Utc::now(),
            classifications_analyzed: records.len(),
            matches,
            accuracy,
            mismatches_count: mismatches.len(),
            tier_accuracy,
            confusion_learning,
            patterns_added,
            patterns_removed,
            total_patterns: patterns.len(),
            effective_patterns,
            threshold_adjustments,
            patterns,
        };

        info!(
            analyzed = outcome.classifications_analyzed,
            accuracy = outcome.accuracy,
            added = outcome.patterns_added,
            removed = outcome.patterns_removed,
            "calibration run complete"
        );
        Ok(outcome)
    }

    fn backup_patterns(&self) {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup = self
            .patterns_file
            .with_file_name(format!("patterns_backup_{stamp}.json"));
        if let Err(e) = std::fs::copy(&self.patterns_file, &backup) {
            warn!(error = %e, "failed to back up patterns file");
        }
    }

    fn save_patterns(&self, patterns: &[RoutingPattern], total_classifications: usize) -> Result<()> {
        let file = PatternsFile {
            version: "2.0".to_string(),
            patterns: patterns.to_vec(),
            last_calibration: Some(Utc::now().to_rfc3339()),
            total_classifications,
            pattern_stats: PatternStats {
                total: patterns.len(),
                effective: patterns.iter().filter(|p| p.is_effective()).count(),
                auto_generated: patterns
                    .iter()
                    .filter(|p| p.source == PatternSource::AutoCalibration)
                    .count(),
                manual: patterns
                    .iter()
                    .filter(|p| p.source == PatternSource::Manual)
                    .count(),
            },
        };

        if let Some(parent) = self.patterns_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.patterns_file.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        std::fs::rename(&tmp, &self.patterns_file)?;
        Ok(())
    }
}

/// Group mismatches by (client_tier, llm_tier) and summarise pairs with at
/// least 5 samples.
fn learn_confusions(mismatches: &[&ClassificationRecord]) -> BTreeMap<String, ConfusionSummary> {
    let mut pairs: HashMap<(RoutingTier, RoutingTier), Vec<&ClassificationRecord>> =
        HashMap::new();
    for &record in mismatches {
        if let Some(llm_tier) = record.llm_tier {
            pairs
                .entry((record.client_tier, llm_tier))
                .or_default()
                .push(record);
        }
    }

    let mut learned = BTreeMap::new();
    for ((client_tier, llm_tier), records) in pairs {
        if records.len() < 5 {
            continue;
        }
        let contents: Vec<&str> = records.iter().map(|r| r.content_preview.as_str()).collect();
        let ngrams = top_ngrams(&contents, &[2], 5);
        learned.insert(
            format!("{client_tier}_vs_{llm_tier}"),
            ConfusionSummary {
                count: records.len(),
                common_ngrams: ngrams,
                dominant_action: dominant_action(&records),
                example: contents.first().map(|s| s.to_string()).unwrap_or_default(),
            },
        );
    }
    learned
}

/// Generate new patterns from mismatches, grouped by the tier the assisted
/// layer chose (treated as ground truth).
fn generate_patterns(mismatches: &[&ClassificationRecord]) -> Vec<RoutingPattern> {
    let mut by_tier: HashMap<RoutingTier, Vec<&ClassificationRecord>> = HashMap::new();
    for &record in mismatches {
        if let Some(tier) = record.llm_tier {
            by_tier.entry(tier).or_default().push(record);
        }
    }

    let mut patterns = Vec::new();
    for (tier, records) in by_tier {
        if records.len() < 3 {
            continue;
        }
        let contents: Vec<&str> = records.iter().map(|r| r.content_preview.as_str()).collect();
        let action = dominant_action(&records);

        for ngram in top_ngrams(&contents, &[2, 3], 3) {
            patterns.push(RoutingPattern {
                regex: format!(r"\b{}\b", regex::escape(&ngram)),
                tier,
                confidence: 0.7,
                times_used: 0,
                times_matched: 0,
                times_correct: 0,
                examples: contents.iter().take(3).map(|s| s.to_string()).collect(),
                added_at: Utc::now().to_rfc3339(),
                source: PatternSource::AutoCalibration,
                action_context: Some(action),
            });
        }
    }
    patterns
}

/// Recompute usage statistics for every pattern by replaying the retained
/// classification history. Stats are rebuilt from zero so repeated
/// calibrations stay comparable.
fn replay_history(patterns: &mut [RoutingPattern], records: &[ClassificationRecord]) {
    let compiled: Vec<Option<Regex>> = patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(&p.regex)
                .case_insensitive(true)
                .build()
                .ok()
        })
        .collect();

    for (pattern, re) in patterns.iter_mut().zip(compiled) {
        pattern.times_used = 0;
        pattern.times_matched = 0;
        pattern.times_correct = 0;
        let Some(re) = re else { continue };

        for record in records {
            if re.is_match(&record.content_preview) {
                pattern.times_used += 1;
                pattern.times_matched += 1;
                if record.final_tier == pattern.tier {
                    pattern.times_correct += 1;
                }
            }
        }
    }
}

/// Sweep candidate thresholds per tier and adopt the score-maximising one.
fn sweep_thresholds(
    comparable: &[&ClassificationRecord],
    current: &BTreeMap<RoutingTier, f64>,
) -> BTreeMap<String, ThresholdAdjustment> {
    const GRID: [f64; 8] = [0.5, 0.6, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95];
    const SIMPLE_GRID: [f64; 6] = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5];

    let mut adjustments = BTreeMap::new();

    for tier in RoutingTier::all() {
        let tier_records: Vec<&&ClassificationRecord> = comparable
            .iter()
            .filter(|r| r.client_tier == tier)
            .collect();
        if tier_records.len() < 20 {
            continue;
        }

        let current_threshold = current
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.default_threshold());

        let baseline_accuracy = tier_records
            .iter()
            .filter(|r| Some(r.client_tier) == r.llm_tier)
            .count() as f64
            / tier_records.len() as f64;

        let grid: &[f64] = if tier == RoutingTier::Simple {
            &SIMPLE_GRID
        } else {
            &GRID
        };

        let mut best_threshold = current_threshold;
        let mut best_accuracy = 0.0;
        let mut best_samples = 0usize;
        let mut best_score = 0.0;

        for &candidate in grid {
            // Confidence buckets rounded to 0.1, matching how the records
            // cluster in practice.
            let above: Vec<&&&ClassificationRecord> = tier_records
                .iter()
                .filter(|r| (r.client_confidence * 10.0).round() / 10.0 >= candidate)
                .collect();
            if above.len() < 10 {
                continue;
            }
            let acc = above
                .iter()
                .filter(|r| Some(r.client_tier) == r.llm_tier)
                .count() as f64
                / above.len() as f64;
            let score = acc * 0.8 + (above.len().min(100) as f64 / 100.0) * 0.2;
            if score > best_score {
                best_score = score;
                best_threshold = candidate;
                best_accuracy = acc;
                best_samples = above.len();
            }
        }

        if (best_threshold - current_threshold).abs() > f64::EPSILON {
            adjustments.insert(
                tier.to_string(),
                ThresholdAdjustment {
                    old_threshold: current_threshold,
                    new_threshold: best_threshold,
                    accuracy: best_accuracy,
                    sample_size: best_samples,
                    improvement: best_accuracy - baseline_accuracy,
                },
            );
        }
    }
    adjustments
}

fn dominant_action(records: &[&ClassificationRecord]) -> ActionType {
    let mut counts: HashMap<ActionType, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.action_type).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(a, _)| a)
        .unwrap_or_default()
}

/// Most frequent word n-grams across `contents` for each n in `sizes`.
/// Words shorter than three characters are ignored.
fn top_ngrams(contents: &[&str], sizes: &[usize], limit: usize) -> Vec<String> {
    let word_re = Regex::new(r"\b\w+\b").expect("word regex is valid");
    let mut counts: HashMap<String, usize> = HashMap::new();

    for content in contents {
        let words: Vec<String> = word_re
            .find_iter(&content.to_lowercase())
            .map(|m| m.as_str().to_string())
            .filter(|w| w.len() > 2)
            .collect();
        for &n in sizes {
            if words.len() < n {
                continue;
            }
            for window in words.windows(n) {
                *counts.entry(window.join(" ")).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(g, _)| g).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Layer;
    use tempfile::TempDir;

    fn record(
        preview: &str,
        client: RoutingTier,
        llm: RoutingTier,
        confidence: f64,
    ) -> ClassificationRecord {
        ClassificationRecord {
            content_preview: preview.to_string(),
            client_tier: client,
            client_confidence: confidence,
            llm_tier: Some(llm),
            llm_confidence: 0.9,
            final_tier: llm,
            layer_used: Layer::Llm,
            action_type: ActionType::Write,
            has_negations: false,
            negations: Vec::new(),
            question_type: None,
            code_presence: 0.0,
            simple_indicators: 0.0,
            technical_terms: 0.0,
            social_interaction: 0.0,
            timestamp: Utc::now(),
            was_calibration: false,
        }
    }

    fn calibrator(dir: &TempDir) -> Calibrator {
        Calibrator::new(
            dir.path().join("routing_patterns.json"),
            CalibrationConfig::default(),
        )
    }

    fn default_thresholds() -> BTreeMap<RoutingTier, f64> {
        RoutingTier::all()
            .into_iter()
            .map(|t| (t, t.default_threshold()))
            .collect()
    }

    #[test]
    fn generates_patterns_from_repeated_mismatches() {
        let dir = TempDir::new().unwrap();
        let cal = calibrator(&dir);

        let mut records = Vec::new();
        for _ in 0..5 {
            records.push(record(
                "deploy the staging build",
                RoutingTier::Medium,
                RoutingTier::Coding,
                0.6,
            ));
        }
        let outcome = cal.calibrate(&records, &default_thresholds()).unwrap();
        assert!(outcome.patterns_added > 0);
        assert!(outcome
            .patterns
            .iter()
            .any(|p| p.source == PatternSource::AutoCalibration
                && p.tier == RoutingTier::Coding
                && p.regex.contains("deploy")));
    }

    #[test]
    fn pattern_set_never_exceeds_max() {
        let dir = TempDir::new().unwrap();
        let mut config = CalibrationConfig::default();
        config.max_patterns = 10;
        let cal = Calibrator::new(dir.path().join("routing_patterns.json"), config);

        let records: Vec<ClassificationRecord> = (0..30)
            .map(|i| {
                record(
                    &format!("unique phrase number {i} deploy build"),
                    RoutingTier::Medium,
                    RoutingTier::Coding,
                    0.6,
                )
            })
            .collect();
        let outcome = cal.calibrate(&records, &default_thresholds()).unwrap();
        assert!(outcome.total_patterns <= 10);
    }

    #[test]
    fn threshold_sweep_adopts_better_threshold() {
        let dir = TempDir::new().unwrap();
        let cal = calibrator(&dir);

        // complex tier, 40 samples: high-confidence ones agree, low ones don't
        let mut records = Vec::new();
        for i in 0..40 {
            let confidence = 0.5 + (i % 5) as f64 * 0.1; // 0.5..0.9
            let llm = if confidence >= 0.8 {
                RoutingTier::Complex
            } else if i % 3 == 0 {
                RoutingTier::Complex
            } else {
                RoutingTier::Medium
            };
            records.push(record("design the system", RoutingTier::Complex, llm, confidence));
        }

        let outcome = cal.calibrate(&records, &default_thresholds()).unwrap();
        if let Some(adj) = outcome.threshold_adjustments.get("complex") {
            assert!(adj.new_threshold != adj.old_threshold);
            assert!(adj.sample_size >= 10);
            assert!(adj.improvement >= 0.0);
        }
    }

    #[test]
    fn replay_rebuilds_usage_stats() {
        let mut patterns = vec![RoutingPattern::manual(
            r"\bdeploy\b",
            RoutingTier::Coding,
            0.8,
        )];
        patterns[0].times_used = 99;

        let records = vec![
            record("deploy it", RoutingTier::Medium, RoutingTier::Coding, 0.6),
            record("deploy again", RoutingTier::Medium, RoutingTier::Coding, 0.6),
            record("unrelated", RoutingTier::Medium, RoutingTier::Medium, 0.6),
        ];
        replay_history(&mut patterns, &records);
        assert_eq!(patterns[0].times_used, 2);
        assert_eq!(patterns[0].times_correct, 2);
    }

    #[test]
    fn patterns_file_written_and_reloadable() {
        let dir = TempDir::new().unwrap();
        let cal = calibrator(&dir);
        let records = vec![record("hello", RoutingTier::Simple, RoutingTier::Simple, 0.9)];
        cal.calibrate(&records, &default_thresholds()).unwrap();

        assert!(dir.path().join("routing_patterns.json").exists());
        let reloaded = cal.load_patterns();
        assert!(!reloaded.is_empty());

        // second run creates a backup of the first file
        cal.calibrate(&records, &default_thresholds()).unwrap();
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("patterns_backup_"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn ngram_extraction_orders_by_frequency() {
        let contents = vec!["fix the build now", "fix the build later", "fix the tests"];
        let grams = top_ngrams(&contents, &[2], 3);
        assert_eq!(grams[0], "fix the");
        assert!(grams.contains(&"the build".to_string()));
    }
}
