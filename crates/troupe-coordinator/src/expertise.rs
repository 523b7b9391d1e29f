use std::collections::HashMap;

use troupe_core::AgentId;

/// External collaborator: per-(bot, domain) expertise scoring.
///
/// The production implementation learns from task history; tests and
/// simple deployments use [`StaticExpertise`].
pub trait ExpertiseSource: Send + Sync {
    /// Expertise of `bot` in `domain`, 0.0–1.0.
    fn expertise_score(&self, bot: &AgentId, domain: &str) -> f64;
}

/// Fixed expertise table.
#[derive(Debug, Default)]
pub struct StaticExpertise {
    scores: HashMap<(String, String), f64>,
    default: f64,
}

impl StaticExpertise {
    pub fn new(default: f64) -> Self {
        Self {
            scores: HashMap::new(),
            default,
        }
    }

    pub fn set(&mut self, bot: &str, domain: &str, score: f64) {
        self.scores
            .insert((bot.to_string(), domain.to_string()), score);
    }
}

impl ExpertiseSource for StaticExpertise {
    fn expertise_score(&self, bot: &AgentId, domain: &str) -> f64 {
        self.scores
            .get(&(bot.as_str().to_string(), domain.to_string()))
            .copied()
            .unwrap_or(self.default)
    }
}
