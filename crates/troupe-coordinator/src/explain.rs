//! Human-readable explanations for coordination decisions: why a bot was
//! selected, how consensus formed, why a task failed, what dissent existed,
//! and how a request was routed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use troupe_core::{AgentId, TaskId};

/// How much of an explanation to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Brief,
    Detailed,
    Full,
}

/// A generated explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub id: String,
    pub subject: String,
    /// bot_selection | consensus | failure | dissent | routing
    pub explanation_type: String,
    pub summary: String,
    pub details: Vec<String>,
    pub reasoning_chain: Vec<String>,
    pub evidence: BTreeMap<String, serde_json::Value>,
    pub confidence: f64,
    pub alternatives: Vec<String>,
    pub why_chosen: String,
    pub timestamp: DateTime<Utc>,
}

/// Generates and stores explanations.
pub struct ExplanationEngine {
    explanations: Mutex<HashMap<String, Explanation>>,
}

impl Default for ExplanationEngine {
    fn default() -> Self {
        Self {
            explanations: Mutex::new(HashMap::new()),
        }
    }
}

impl ExplanationEngine {
    /// Why a bot was selected over the alternatives.
    pub fn explain_bot_selection(
        &self,
        selected: &AgentId,
        domain: &str,
        scores: &BTreeMap<String, f64>,
    ) -> Explanation {
        let selected_score = scores.get(selected.as_str()).copied().unwrap_or(0.0);

        let mut ranked: Vec<(&String, &f64)> = scores.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        let others: Vec<(&String, &f64)> = ranked
            .iter()
            .filter(|(bot, _)| bot.as_str() != selected.as_str())
            .cloned()
            .collect();

        let mut details = vec![
            format!("Task domain: {domain}"),
            format!("Available bots: {}", scores.len()),
            format!("{selected}'s expertise score: {selected_score:.2}"),
        ];
        if let Some((runner_up, score)) = others.first() {
            details.push(format!("Next best option: {runner_up} (score: {score:.2})"));
            details.push(format!(
                "Selection advantage: {:.2} points",
                selected_score - **score
            ));
        }

        let reasoning_chain = vec![
            format!("1. Identified {} bots available for {domain}", scores.len()),
            format!("2. Evaluated each bot's expertise in {domain}"),
            format!(
                "3. {selected} had highest score at {:.0}%",
                selected_score * 100.0
            ),
            format!("4. Task assigned to {selected}"),
        ];

        let mut evidence = BTreeMap::new();
        evidence.insert("domain".to_string(), serde_json::json!(domain));
        evidence.insert("expertise_scores".to_string(), serde_json::json!(scores));
        evidence.insert(
            "selection_method".to_string(),
            serde_json::json!("expertise_based"),
        );

        self.store(Explanation {
            id: Uuid::new_v4().to_string(),
            subject: format!("Bot Selection for {domain}"),
            explanation_type: "bot_selection".to_string(),
            summary: format!(
                "{selected} was selected for {domain} task based on expertise score of {:.0}%",
                selected_score * 100.0
            ),
            details,
            reasoning_chain,
            evidence,
            confidence: selected_score,
            alternatives: others.iter().take(3).map(|(b, _)| b.to_string()).collect(),
            why_chosen: format!("Highest expertise score in {domain} domain"),
            timestamp: Utc::now(),
        })
    }

    /// How consensus was reached.
    pub fn explain_consensus(
        &self,
        decision: &str,
        positions: &BTreeMap<String, String>,
        confidences: &BTreeMap<String, f64>,
        strategy: &str,
    ) -> Explanation {
        let supporters: Vec<&String> = positions
            .iter()
            .filter(|(_, pos)| pos.as_str() == decision)
            .map(|(bot, _)| bot)
            .collect();
        let support_rate = if positions.is_empty() {
            0.0
        } else {
            supporters.len() as f64 / positions.len() as f64
        };
        let avg_confidence = if supporters.is_empty() {
            0.0
        } else {
            supporters
                .iter()
                .map(|bot| confidences.get(*bot).copied().unwrap_or(0.5))
                .sum::<f64>()
                / supporters.len() as f64
        };

        let mut details = vec![
            format!("Decision method: {strategy}"),
            format!("Participants: {} bots", positions.len()),
            format!(
                "Supporting bots: {}",
                supporters
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            format!("Average confidence: {:.0}%", avg_confidence * 100.0),
        ];
        let unique: Vec<&String> = {
            let mut seen = Vec::new();
            for pos in positions.values() {
                if !seen.contains(&pos) {
                    seen.push(pos);
                }
            }
            seen
        };
        for pos in &unique {
            let holders: Vec<&str> = positions
                .iter()
                .filter(|(_, p)| *p == *pos)
                .map(|(b, _)| b.as_str())
                .collect();
            details.push(format!(
                "  - '{pos}': {} bot(s) - {}",
                holders.len(),
                holders.join(", ")
            ));
        }

        let mut evidence = BTreeMap::new();
        evidence.insert("voting_strategy".to_string(), serde_json::json!(strategy));
        evidence.insert("positions".to_string(), serde_json::json!(positions));
        evidence.insert("support_rate".to_string(), serde_json::json!(support_rate));

        self.store(Explanation {
            id: Uuid::new_v4().to_string(),
            subject: format!("Consensus Decision: {decision}"),
            explanation_type: "consensus".to_string(),
            summary: format!(
                "Team consensus: '{decision}' with {}/{} bots in agreement ({:.0}%)",
                supporters.len(),
                positions.len(),
                support_rate * 100.0
            ),
            details,
            reasoning_chain: vec![
                format!("1. {} bots participated in decision", positions.len()),
                format!("2. Used {strategy} voting strategy"),
                format!(
                    "3. {} bots ({:.0}%) supported '{decision}'",
                    supporters.len(),
                    support_rate * 100.0
                ),
                format!(
                    "4. Consensus reached with {:.0}% average confidence",
                    avg_confidence * 100.0
                ),
            ],
            evidence,
            confidence: support_rate * avg_confidence,
            alternatives: unique
                .into_iter()
                .filter(|p| p.as_str() != decision)
                .cloned()
                .collect(),
            why_chosen: format!(
                "Reached {strategy} threshold with {:.0}% support",
                support_rate * 100.0
            ),
            timestamp: Utc::now(),
        })
    }

    /// Why a task failed.
    pub fn explain_failure(
        &self,
        task_id: &TaskId,
        error: &str,
        assigned_bot: &AgentId,
        recovery_attempts: u32,
    ) -> Explanation {
        let mut details = vec![
            format!("Assigned bot: {assigned_bot}"),
            format!("Error: {error}"),
        ];
        if recovery_attempts > 0 {
            details.push(format!("Recovery attempts: {recovery_attempts}"));
        }

        let lower = error.to_lowercase();
        let mut suggestions = Vec::new();
        if lower.contains("expertise") {
            suggestions.push("Consider assigning to bot with higher expertise".to_string());
        }
        if lower.contains("timeout") {
            suggestions.push("Consider breaking task into smaller sub-tasks".to_string());
        }
        if lower.contains("blocked") || lower.contains("dependency") {
            suggestions.push("Check task dependencies and resolve blockers first".to_string());
        }

        let mut reasoning_chain = vec![
            format!("1. Task {task_id} assigned to {assigned_bot}"),
            format!("2. {assigned_bot} attempted to execute task"),
            format!("3. Error occurred: {error}"),
        ];
        if recovery_attempts > 0 {
            reasoning_chain.push(format!("4. {recovery_attempts} recovery attempts made"));
            reasoning_chain.push("5. All recovery attempts failed".to_string());
        }
        reasoning_chain.push("6. Task marked as failed".to_string());

        let mut evidence = BTreeMap::new();
        evidence.insert("task_id".to_string(), serde_json::json!(task_id.as_str()));
        evidence.insert("error".to_string(), serde_json::json!(error));
        evidence.insert(
            "recovery_attempts".to_string(),
            serde_json::json!(recovery_attempts),
        );

        self.store(Explanation {
            id: Uuid::new_v4().to_string(),
            subject: format!("Task Failure: {task_id}"),
            explanation_type: "failure".to_string(),
            summary: format!("Task {task_id} failed while being executed by {assigned_bot}"),
            details,
            reasoning_chain,
            evidence,
            confidence: 0.9,
            alternatives: suggestions,
            why_chosen: "Error occurred during execution that could not be recovered".to_string(),
            timestamp: Utc::now(),
        })
    }

    /// What dissent existed around a decision.
    pub fn explain_dissent(
        &self,
        decision: &str,
        positions: &BTreeMap<String, String>,
        dissenting_bots: &[String],
    ) -> Explanation {
        let mut details = vec![
            format!("Final decision: {decision}"),
            format!("Dissenting bots: {}", dissenting_bots.join(", ")),
        ];
        let mut dissenting_positions = Vec::new();
        for bot in dissenting_bots {
            let pos = positions
                .get(bot)
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            if !dissenting_positions.contains(&pos.to_string()) {
                dissenting_positions.push(pos.to_string());
            }
            details.push(format!("  - {bot} preferred '{pos}'"));
        }

        let mut evidence = BTreeMap::new();
        evidence.insert("final_decision".to_string(), serde_json::json!(decision));
        evidence.insert("all_positions".to_string(), serde_json::json!(positions));
        evidence.insert(
            "dissenting_bots".to_string(),
            serde_json::json!(dissenting_bots),
        );

        self.store(Explanation {
            id: Uuid::new_v4().to_string(),
            subject: format!("Dissent on Decision: {decision}"),
            explanation_type: "dissent".to_string(),
            summary: format!(
                "{} bot(s) disagreed with decision: '{decision}'",
                dissenting_bots.len()
            ),
            details,
            reasoning_chain: vec![
                format!("1. Team vote resulted in '{decision}'"),
                format!(
                    "2. {} bot(s) held alternative view(s)",
                    dissenting_bots.len()
                ),
                format!(
                    "3. Dissenting positions: {}",
                    dissenting_positions.join(", ")
                ),
                "4. Decision was made based on the support threshold".to_string(),
                "5. Dissent was noted and documented".to_string(),
            ],
            evidence,
            confidence: 0.8,
            alternatives: dissenting_positions,
            why_chosen: "Decision followed the voting protocol despite minority dissent"
                .to_string(),
            timestamp: Utc::now(),
        })
    }

    /// How a user request was routed to specialists.
    pub fn explain_routing(
        &self,
        request: &str,
        domains: &[String],
        complexity: &str,
        selected_bots: &[String],
        approach: &str,
    ) -> Explanation {
        let domain_list = if domains.is_empty() {
            "general".to_string()
        } else {
            domains.join(", ")
        };

        let mut details = vec![
            format!("Request domains: {domain_list}"),
            format!("Complexity: {complexity}"),
            format!("Approach: {approach}"),
            format!("Selected bots: {}", selected_bots.join(", ")),
        ];
        if complexity == "high" {
            details.push("High complexity requires team coordination".to_string());
        }
        if domains.len() > 1 {
            details.push(format!(
                "Multiple domains ({}) require multi-bot approach",
                domains.len()
            ));
        }

        let preview: String = request.chars().take(100).collect();
        let mut evidence = BTreeMap::new();
        evidence.insert("request_preview".to_string(), serde_json::json!(preview));
        evidence.insert("approach".to_string(), serde_json::json!(approach));
        evidence.insert(
            "selected_bots".to_string(),
            serde_json::json!(selected_bots),
        );

        self.store(Explanation {
            id: Uuid::new_v4().to_string(),
            subject: "Request Routing Decision".to_string(),
            explanation_type: "routing".to_string(),
            summary: format!(
                "Request routed to {} using {approach} approach",
                selected_bots.join(", ")
            ),
            details,
            reasoning_chain: vec![
                "1. Request analyzed for content and complexity".to_string(),
                format!("2. Identified {} domain(s): {domain_list}", domains.len()),
                format!("3. Complexity assessed as {complexity}"),
                format!("4. {approach} approach selected"),
                format!("5. Assigned to {}", selected_bots.join(", ")),
            ],
            evidence,
            confidence: 0.85,
            alternatives: vec!["different_bot_selection".to_string()],
            why_chosen: format!(
                "Best match for {complexity} complexity and {} domain(s)",
                domains.len()
            ),
            timestamp: Utc::now(),
        })
    }

    pub fn get(&self, id: &str) -> Option<Explanation> {
        self.explanations.lock().unwrap().get(id).cloned()
    }

    /// Explanations filtered by task and/or type, newest first.
    pub fn report(
        &self,
        task_id: Option<&TaskId>,
        explanation_type: Option<&str>,
    ) -> Vec<Explanation> {
        let explanations = self.explanations.lock().unwrap();
        let mut out: Vec<Explanation> = explanations
            .values()
            .filter(|e| {
                if let Some(task_id) = task_id {
                    if e.evidence.get("task_id").and_then(|v| v.as_str())
                        != Some(task_id.as_str())
                    {
                        return false;
                    }
                }
                if let Some(t) = explanation_type {
                    if e.explanation_type != t {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    /// Render an explanation at the given detail level.
    pub fn format(&self, explanation: &Explanation, level: DetailLevel) -> String {
        let mut lines = vec![
            format!("=== {} ===", explanation.subject),
            format!("Type: {}", explanation.explanation_type),
            String::new(),
            "SUMMARY:".to_string(),
            format!("  {}", explanation.summary),
        ];

        if matches!(level, DetailLevel::Detailed | DetailLevel::Full) {
            lines.push(String::new());
            lines.push("DETAILS:".to_string());
            for detail in &explanation.details {
                lines.push(format!("  - {detail}"));
            }
        }

        if level == DetailLevel::Full {
            lines.push(String::new());
            lines.push("REASONING:".to_string());
            for step in &explanation.reasoning_chain {
                lines.push(format!("  {step}"));
            }
            if !explanation.alternatives.is_empty() {
                lines.push(String::new());
                lines.push("ALTERNATIVES CONSIDERED:".to_string());
                for alt in &explanation.alternatives {
                    lines.push(format!("  - {alt}"));
                }
            }
            lines.push(String::new());
            lines.push(format!("WHY CHOSEN: {}", explanation.why_chosen));
        }

        lines.push(String::new());
        lines.push(format!(
            "Confidence: {:.0}%",
            explanation.confidence * 100.0
        ));
        lines.join("\n")
    }

    fn store(&self, explanation: Explanation) -> Explanation {
        self.explanations
            .lock()
            .unwrap()
            .insert(explanation.id.clone(), explanation.clone());
        explanation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_selection_explanation_ranks_alternatives() {
        let engine = ExplanationEngine::default();
        let scores: BTreeMap<String, f64> = [
            ("coder".to_string(), 0.9),
            ("researcher".to_string(), 0.6),
            ("social".to_string(), 0.2),
        ]
        .into_iter()
        .collect();

        let explanation =
            engine.explain_bot_selection(&AgentId::new("coder"), "development", &scores);
        assert_eq!(explanation.explanation_type, "bot_selection");
        assert!((explanation.confidence - 0.9).abs() < 1e-9);
        assert_eq!(explanation.alternatives[0], "researcher");
        assert!(explanation
            .details
            .iter()
            .any(|d| d.contains("Next best option: researcher")));
    }

    #[test]
    fn consensus_explanation_computes_support() {
        let engine = ExplanationEngine::default();
        let positions: BTreeMap<String, String> = [
            ("a".to_string(), "ship".to_string()),
            ("b".to_string(), "ship".to_string()),
            ("c".to_string(), "hold".to_string()),
        ]
        .into_iter()
        .collect();
        let confidences: BTreeMap<String, f64> =
            [("a".to_string(), 0.9), ("b".to_string(), 0.7)].into_iter().collect();

        let explanation = engine.explain_consensus("ship", &positions, &confidences, "majority");
        assert!(explanation.summary.contains("2/3"));
        assert_eq!(explanation.alternatives, vec!["hold".to_string()]);
    }

    #[test]
    fn failure_explanation_suggests_recovery_for_timeouts() {
        let engine = ExplanationEngine::default();
        let explanation = engine.explain_failure(
            &TaskId::new(),
            "request timeout while fetching data",
            &AgentId::new("researcher"),
            2,
        );
        assert!(explanation
            .alternatives
            .iter()
            .any(|s| s.contains("smaller sub-tasks")));
        assert!(explanation
            .reasoning_chain
            .iter()
            .any(|s| s.contains("2 recovery attempts")));
    }

    #[test]
    fn format_levels_render_progressively() {
        let engine = ExplanationEngine::default();
        let scores: BTreeMap<String, f64> = [("coder".to_string(), 0.8)].into_iter().collect();
        let explanation =
            engine.explain_bot_selection(&AgentId::new("coder"), "development", &scores);

        let brief = engine.format(&explanation, DetailLevel::Brief);
        let detailed = engine.format(&explanation, DetailLevel::Detailed);
        let full = engine.format(&explanation, DetailLevel::Full);

        assert!(brief.contains("SUMMARY:"));
        assert!(!brief.contains("DETAILS:"));
        assert!(detailed.contains("DETAILS:"));
        assert!(!detailed.contains("REASONING:"));
        assert!(full.contains("REASONING:"));
        assert!(full.contains("WHY CHOSEN:"));
    }

    #[test]
    fn report_filters_by_type() {
        let engine = ExplanationEngine::default();
        let scores: BTreeMap<String, f64> = [("coder".to_string(), 0.8)].into_iter().collect();
        engine.explain_bot_selection(&AgentId::new("coder"), "development", &scores);
        engine.explain_routing("do things", &[], "low", &["leader".to_string()], "direct");

        assert_eq!(engine.report(None, Some("routing")).len(), 1);
        assert_eq!(engine.report(None, None).len(), 2);
    }
}
