use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use troupe_core::RoutingTier;

/// Which layer produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Deterministic Layer-1 classifier.
    Client,
    /// On-device model.
    Local,
    /// Remote assisted classifier.
    Llm,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Client => "client",
            Self::Local => "local",
            Self::Llm => "llm",
        };
        write!(f, "{s}")
    }
}

/// Verb class of the message, used for context-consistency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Write,
    Explain,
    Analyze,
    Fix,
    #[default]
    General,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Write => "write",
            Self::Explain => "explain",
            Self::Analyze => "analyze",
            Self::Fix => "fix",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    YesNo,
    WhQuestion,
    Open,
}

/// Full Layer-1 score bundle. Every value is in [0, 1].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub code_presence: f64,
    pub simple_indicators: f64,
    pub technical_terms: f64,
    pub social_interaction: f64,
    /// Detected negation phrases ("don't write code", …).
    pub negations: Vec<String>,
    pub action_type: ActionType,
    pub question_type: Option<QuestionType>,
    /// Urgency markers found in the content ("asap", "urgent", …).
    pub urgency: Vec<String>,
    pub word_count: usize,
}

impl ClassificationScores {
    pub fn has_negations(&self) -> bool {
        !self.negations.is_empty()
    }
}

/// The routing verdict handed to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub tier: RoutingTier,
    /// Resolved backend model name; empty until the tier config fills it.
    pub model: String,
    pub confidence: f64,
    pub layer: Layer,
    pub reasoning: String,
    /// Quantised to {50, 200, 800, 1000, 2000}.
    pub estimated_tokens: u32,
    pub needs_tools: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RoutingDecision {
    pub fn new(tier: RoutingTier, confidence: f64, layer: Layer, reasoning: &str) -> Self {
        Self {
            tier,
            model: String::new(),
            confidence,
            layer,
            reasoning: reasoning.to_string(),
            estimated_tokens: tier.estimated_tokens(),
            needs_tools: tier != RoutingTier::Simple,
            metadata: BTreeMap::new(),
        }
    }

    pub fn tag(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.insert(key.to_string(), value);
    }
}

/// Where a routing pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    Manual,
    AutoCalibration,
}

/// A regex routing pattern with usage statistics.
///
/// `effectiveness_score` ranks patterns for eviction: a weighted blend of
/// success rate and usage volume, with usage saturating at
/// [`RoutingPattern::USAGE_SATURATION`] observations so a stale
/// high-traffic pattern cannot crowd out accurate new ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPattern {
    pub regex: String,
    pub tier: RoutingTier,
    /// Confidence assigned when this pattern matches.
    pub confidence: f64,
    #[serde(default)]
    pub times_used: u64,
    #[serde(default)]
    pub times_matched: u64,
    #[serde(default)]
    pub times_correct: u64,
    #[serde(default)]
    pub examples: Vec<String>,
    pub added_at: String,
    pub source: PatternSource,
    /// Dominant action type among the samples that produced this pattern.
    pub action_context: Option<ActionType>,
}

impl RoutingPattern {
    pub const USAGE_SATURATION: u64 = 20;

    pub fn manual(regex: &str, tier: RoutingTier, confidence: f64) -> Self {
        Self {
            regex: regex.to_string(),
            tier,
            confidence,
            times_used: 0,
            times_matched: 0,
            times_correct: 0,
            examples: Vec::new(),
            added_at: chrono::Utc::now().to_rfc3339(),
            source: PatternSource::Manual,
            action_context: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.times_used == 0 {
            // Unproven patterns score at their assigned confidence.
            return self.confidence;
        }
        self.times_correct as f64 / self.times_used as f64
    }

    pub fn effectiveness_score(&self, success_weight: f64, usage_weight: f64) -> f64 {
        let usage = (self.times_used.min(Self::USAGE_SATURATION)) as f64
            / Self::USAGE_SATURATION as f64;
        success_weight * self.success_rate() + usage_weight * usage
    }

    pub fn is_effective(&self) -> bool {
        self.times_used >= 5 && self.success_rate() >= 0.6
    }
}

/// On-disk shape of `routing_patterns.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternsFile {
    pub version: String,
    pub patterns: Vec<RoutingPattern>,
    pub last_calibration: Option<String>,
    pub total_classifications: usize,
    pub pattern_stats: PatternStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternStats {
    pub total: usize,
    pub effective: usize,
    pub auto_generated: usize,
    pub manual: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effectiveness_blends_success_and_usage() {
        let mut p = RoutingPattern::manual(r"\bhello\b", RoutingTier::Simple, 0.9);
        p.times_used = 10;
        p.times_correct = 8;
        // 0.7 * 0.8 + 0.3 * (10/20) = 0.56 + 0.15
        let score = p.effectiveness_score(0.7, 0.3);
        assert!((score - 0.71).abs() < 1e-9);
    }

    #[test]
    fn unproven_pattern_scores_at_confidence() {
        let p = RoutingPattern::manual(r"\bprove\b", RoutingTier::Reasoning, 0.8);
        assert!((p.success_rate() - 0.8).abs() < 1e-9);
        assert!(!p.is_effective());
    }

    #[test]
    fn usage_saturates() {
        let mut p = RoutingPattern::manual(r"x", RoutingTier::Medium, 0.5);
        p.times_used = 500;
        p.times_correct = 500;
        let score = p.effectiveness_score(0.7, 0.3);
        assert!((score - 1.0).abs() < 1e-9);
    }
}
