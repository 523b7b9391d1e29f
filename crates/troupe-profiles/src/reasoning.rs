//! Per-role chain-of-thought reasoning configuration.
//!
//! Consumed opaquely by external model callers: the coordination core
//! chooses the config by role, the caller decides what to do with it.

use std::collections::BTreeSet;

/// Reflection depth after tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoTLevel {
    /// No reflection, fastest.
    None,
    /// Only after error-prone tools.
    Minimal,
    /// After complex tools, skipping trivial ones.
    Standard,
    /// After every tool call.
    Full,
}

/// Reasoning behaviour for one bot role.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub cot_level: CoTLevel,
    /// Per-tier overrides; None falls back to the derived adjustment.
    pub simple_tier_level: Option<CoTLevel>,
    pub medium_tier_level: Option<CoTLevel>,
    pub complex_tier_level: Option<CoTLevel>,
    /// Tools that always / never trigger reflection.
    pub always_cot_tools: BTreeSet<String>,
    pub never_cot_tools: BTreeSet<String>,
    pub reflection_prompt: Option<String>,
    pub max_reflection_tokens: u32,
    pub temperature: f64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            cot_level: CoTLevel::Standard,
            simple_tier_level: None,
            medium_tier_level: None,
            complex_tier_level: None,
            always_cot_tools: BTreeSet::new(),
            never_cot_tools: BTreeSet::new(),
            reflection_prompt: Some(
                "Reflect on the results:\n1. Did the action complete successfully?\n2. What does the output tell you?\n3. What's the next step?"
                    .to_string(),
            ),
            max_reflection_tokens: 150,
            temperature: 0.7,
        }
    }
}

impl ReasoningConfig {
    /// Should reflection run for this (tier, tool) pair?
    pub fn should_use_cot(&self, tier: &str, tool_name: &str) -> bool {
        // exclusions first, then mandatory triggers
        if self.never_cot_tools.contains(tool_name) || self.never_cot_tools.contains("*") {
            return false;
        }
        if self.always_cot_tools.contains(tool_name) {
            return true;
        }

        match self.effective_level(tier) {
            CoTLevel::None => false,
            CoTLevel::Full => true,
            CoTLevel::Minimal => {
                const ERROR_PRONE: [&str; 4] = ["spawn", "exec", "eval", "github"];
                ERROR_PRONE.contains(&tool_name)
            }
            CoTLevel::Standard => {
                const TRIVIAL: [&str; 4] = ["time", "date", "ping", "weather"];
                !TRIVIAL.contains(&tool_name)
            }
        }
    }

    /// Level for a tier: explicit override, else simple is downgraded one
    /// step and complex upgraded one step.
    fn effective_level(&self, tier: &str) -> CoTLevel {
        let override_level = match tier.to_lowercase().as_str() {
            "simple" => self.simple_tier_level,
            "medium" => self.medium_tier_level,
            "complex" | "reasoning" => self.complex_tier_level,
            _ => None,
        };
        if let Some(level) = override_level {
            return level;
        }

        const LEVELS: [CoTLevel; 4] = [
            CoTLevel::None,
            CoTLevel::Minimal,
            CoTLevel::Standard,
            CoTLevel::Full,
        ];
        let idx = LEVELS
            .iter()
            .position(|l| *l == self.cot_level)
            .unwrap_or(2);

        match tier.to_lowercase().as_str() {
            "simple" => LEVELS[idx.saturating_sub(1)],
            "complex" | "reasoning" => LEVELS[(idx + 1).min(LEVELS.len() - 1)],
            _ => self.cot_level,
        }
    }
}

fn tools(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Reasoning config for a bot role. Unknown roles get the default.
pub fn get_reasoning_config(role: &str) -> ReasoningConfig {
    match role.to_lowercase().as_str() {
        "researcher" => ReasoningConfig {
            cot_level: CoTLevel::Standard,
            always_cot_tools: tools(&["search", "analyze", "compare", "research"]),
            never_cot_tools: tools(&["time", "date", "ping"]),
            reflection_prompt: Some(
                "Reflect on your research:\n1. What sources did you find? Are they credible?\n2. What gaps exist in the information?\n3. What's the key insight for the user?"
                    .to_string(),
            ),
            max_reflection_tokens: 200,
            ..Default::default()
        },
        "coder" => ReasoningConfig {
            cot_level: CoTLevel::Full,
            always_cot_tools: tools(&["spawn", "exec", "github", "eval", "test"]),
            never_cot_tools: tools(&["time", "date"]),
            reflection_prompt: Some(
                "Analyze this code execution:\n1. Did the code run successfully? If not, what error occurred?\n2. What does the output tell you?\n3. What's the next implementation step?"
                    .to_string(),
            ),
            max_reflection_tokens: 250,
            ..Default::default()
        },
        "social" => ReasoningConfig {
            cot_level: CoTLevel::None,
            simple_tier_level: Some(CoTLevel::None),
            medium_tier_level: Some(CoTLevel::None),
            complex_tier_level: Some(CoTLevel::Minimal),
            never_cot_tools: tools(&["*"]),
            reflection_prompt: None,
            max_reflection_tokens: 0,
            ..Default::default()
        },
        "auditor" => ReasoningConfig {
            cot_level: CoTLevel::Minimal,
            always_cot_tools: tools(&["audit", "review", "analyze"]),
            never_cot_tools: tools(&["time", "date", "list", "ping"]),
            reflection_prompt: Some(
                "Verify audit findings:\n1. What issues were identified? How severe?\n2. What's the recommended remediation?"
                    .to_string(),
            ),
            max_reflection_tokens: 100,
            ..Default::default()
        },
        "creative" => ReasoningConfig {
            cot_level: CoTLevel::Standard,
            always_cot_tools: tools(&["generate", "design", "edit", "create"]),
            never_cot_tools: tools(&["time", "date", "ping"]),
            reflection_prompt: Some(
                "Evaluate your creative work:\n1. Does this match the user's intent?\n2. What alternatives could work?"
                    .to_string(),
            ),
            max_reflection_tokens: 180,
            ..Default::default()
        },
        "leader" | "coordinator" => ReasoningConfig {
            cot_level: CoTLevel::Full,
            always_cot_tools: tools(&["delegate", "coordinate", "notify", "dispatch"]),
            never_cot_tools: tools(&["time", "date", "ping"]),
            reflection_prompt: Some(
                "Assess coordination status:\n1. What tasks are in progress? Any blockers?\n2. Which bot is best suited for next action?\n3. What's the priority order?"
                    .to_string(),
            ),
            max_reflection_tokens: 200,
            ..Default::default()
        },
        _ => ReasoningConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_list_beats_always_list_rules() {
        let config = get_reasoning_config("coder");
        assert!(config.should_use_cot("complex", "spawn"));
        assert!(!config.should_use_cot("complex", "time"));
    }

    #[test]
    fn social_role_never_reflects_except_complex_error_prone() {
        let config = get_reasoning_config("social");
        assert!(!config.should_use_cot("simple", "post"));
        assert!(!config.should_use_cot("complex", "exec")); // wildcard deny
    }

    #[test]
    fn tier_adjustment_moves_one_step() {
        let config = ReasoningConfig::default(); // Standard
        // simple downgraded to Minimal: only error-prone tools reflect
        assert!(config.should_use_cot("simple", "exec"));
        assert!(!config.should_use_cot("simple", "summarize"));
        // complex upgraded to Full: everything reflects
        assert!(config.should_use_cot("complex", "summarize"));
    }

    #[test]
    fn unknown_role_gets_default() {
        let config = get_reasoning_config("mystery");
        assert_eq!(config.cot_level, CoTLevel::Standard);
        assert_eq!(config.max_reflection_tokens, 150);
    }
}
