//! Decision-making: voting strategies, consensus extraction, and dispute
//! resolution.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use troupe_core::{AgentId, TaskId};

use crate::error::{CoordinatorError, Result};

/// Strategies for reaching a team decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    /// Accept only if every participant's position matches.
    Unanimous,
    /// Accept if any option holds strictly more than half the votes.
    Majority,
    /// Sum `expertise x confidence` per option; highest wins.
    Weighted,
    /// Most raw votes wins, majority or not.
    Plurality,
}

impl std::fmt::Display for VotingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unanimous => "unanimous",
            Self::Majority => "majority",
            Self::Weighted => "weighted",
            Self::Plurality => "plurality",
        };
        write!(f, "{s}")
    }
}

/// How a decision was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Consensus,
    DisputeResolution,
    ExpertiseBased,
    WeightedVote,
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Consensus => "consensus",
            Self::DisputeResolution => "dispute_resolution",
            Self::ExpertiseBased => "expertise_based",
            Self::WeightedVote => "weighted_vote",
        };
        write!(f, "{s}")
    }
}

/// Categories of disagreement, inferred from reasoning texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementType {
    Factual,
    Methodological,
    Priority,
    Philosophical,
    IncompleteInfo,
}

/// One bot's stance on a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotPosition {
    pub bot_id: AgentId,
    /// What the bot supports.
    pub position: String,
    /// 0.0–1.0.
    pub confidence: f64,
    pub reasoning: String,
    /// Expertise in the decision's domain, when known.
    pub expertise_score: Option<f64>,
}

impl BotPosition {
    pub fn new(bot_id: &str, position: &str, confidence: f64, reasoning: &str) -> Self {
        Self {
            bot_id: AgentId::new(bot_id),
            position: position.to_string(),
            confidence,
            reasoning: reasoning.to_string(),
            expertise_score: None,
        }
    }

    pub fn with_expertise(mut self, score: f64) -> Self {
        self.expertise_score = Some(score);
        self
    }
}

/// A decision reached by the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub task_id: Option<TaskId>,
    pub decision_type: DecisionType,
    pub participants: Vec<AgentId>,
    pub positions: Vec<BotPosition>,
    pub final_decision: String,
    pub confidence: f64,
    pub reasoning: String,
    /// Summary of non-chosen positions, when any.
    pub dissent: Option<String>,
    pub escalated: bool,
    pub timestamp: DateTime<Utc>,
}

/// A detected disagreement between bots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub id: String,
    pub task_id: Option<TaskId>,
    pub disagreement_type: DisagreementType,
    pub positions: Vec<BotPosition>,
    pub common_ground: String,
    /// 0.0 (minor) to 1.0 (critical).
    pub severity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Shared-theme keywords checked when looking for common ground. This
/// list is closed; tests assert against it rather than the rendered text.
pub const COMMON_GROUND_THEMES: [&str; 6] =
    ["goal", "objective", "aim", "need", "important", "critical"];

/// Orchestrates team decision-making across the four voting strategies.
pub struct DecisionMaker {
    decisions: Mutex<HashMap<String, Decision>>,
}

impl Default for DecisionMaker {
    fn default() -> Self {
        Self {
            decisions: Mutex::new(HashMap::new()),
        }
    }
}

impl DecisionMaker {
    /// Run a vote over `options` and record the resulting decision.
    pub fn create_vote(
        &self,
        options: &[String],
        positions: &[BotPosition],
        strategy: VotingStrategy,
        task_id: Option<TaskId>,
    ) -> Result<Decision> {
        if positions.is_empty() {
            return Err(CoordinatorError::NoPositions);
        }
        if options.is_empty() {
            return Err(CoordinatorError::NoOptions);
        }

        let participants: Vec<AgentId> = positions.iter().map(|p| p.bot_id.clone()).collect();

        // weight and raw count per option
        let mut weights: Vec<f64> = vec![0.0; options.len()];
        let mut counts: Vec<usize> = vec![0; options.len()];
        for position in positions {
            if let Some(idx) = options
                .iter()
                .position(|o| o.eq_ignore_ascii_case(&position.position))
            {
                let weight = match strategy {
                    VotingStrategy::Weighted => {
                        position.expertise_score.unwrap_or(1.0) * position.confidence
                    }
                    _ => position.confidence,
                };
                weights[idx] += weight;
                counts[idx] += 1;
            }
        }

        let winner_idx = resolve_vote(&weights, &counts, participants.len(), strategy);
        let final_decision = options[winner_idx].clone();

        let total_weight: f64 = weights.iter().sum();
        let confidence = if total_weight > 0.0 {
            weights[winner_idx] / total_weight
        } else {
            0.0
        };

        let decision_type = match strategy {
            VotingStrategy::Weighted => DecisionType::WeightedVote,
            _ => DecisionType::Consensus,
        };

        let decision = Decision {
            id: Uuid::new_v4().to_string(),
            task_id,
            decision_type,
            participants,
            positions: positions.to_vec(),
            final_decision: final_decision.clone(),
            confidence,
            reasoning: voting_reasoning(positions, &final_decision, strategy),
            dissent: summarize_dissent(positions, &final_decision),
            escalated: false,
            timestamp: Utc::now(),
        };

        self.decisions
            .lock()
            .unwrap()
            .insert(decision.id.clone(), decision.clone());
        info!(
            decision_id = %decision.id,
            strategy = %strategy,
            winner = %decision.final_decision,
            confidence = decision.confidence,
            "vote resolved"
        );
        Ok(decision)
    }

    /// Consensus exists when one exact position text reaches the required
    /// share of participants. Returns the first such position in
    /// submission order.
    pub fn get_consensus(
        &self,
        positions: &[BotPosition],
        required_agreement: f64,
    ) -> Option<String> {
        if positions.is_empty() {
            return None;
        }
        let total = positions.len() as f64;
        let mut seen: Vec<(&str, usize)> = Vec::new();
        for position in positions {
            match seen.iter_mut().find(|(text, _)| *text == position.position) {
                Some((_, n)) => *n += 1,
                None => seen.push((&position.position, 1)),
            }
        }
        seen.into_iter()
            .find(|(_, n)| *n as f64 / total >= required_agreement)
            .map(|(text, _)| text.to_string())
    }

    /// Resolve a dispute: consensus around common ground first, then the
    /// most expert position, then escalation.
    pub fn resolve_dispute(
        &self,
        disagreement: &Disagreement,
        required_agreement: f64,
    ) -> Decision {
        let common_ground = find_common_ground(&disagreement.positions);

        if let Some(consensus) = self.get_consensus(&disagreement.positions, required_agreement) {
            let decision = Decision {
                id: Uuid::new_v4().to_string(),
                task_id: disagreement.task_id.clone(),
                decision_type: DecisionType::DisputeResolution,
                participants: disagreement
                    .positions
                    .iter()
                    .map(|p| p.bot_id.clone())
                    .collect(),
                positions: disagreement.positions.clone(),
                final_decision: consensus.clone(),
                confidence: 0.7,
                reasoning: format!("Resolved dispute using common ground: {common_ground}"),
                dissent: summarize_dissent(&disagreement.positions, &consensus),
                escalated: false,
                timestamp: Utc::now(),
            };
            self.decisions
                .lock()
                .unwrap()
                .insert(decision.id.clone(), decision.clone());
            return decision;
        }

        // no consensus: take the most expert bot's position (ties broken
        // by confidence), or escalate when nobody carries expertise
        let best = disagreement.positions.iter().max_by(|a, b| {
            let ka = (a.expertise_score.unwrap_or(0.0), a.confidence);
            let kb = (b.expertise_score.unwrap_or(0.0), b.confidence);
            ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let decision = match best {
            Some(pos) if pos.expertise_score.is_some() => Decision {
                id: Uuid::new_v4().to_string(),
                task_id: disagreement.task_id.clone(),
                decision_type: DecisionType::ExpertiseBased,
                participants: disagreement
                    .positions
                    .iter()
                    .map(|p| p.bot_id.clone())
                    .collect(),
                positions: disagreement.positions.clone(),
                final_decision: pos.position.clone(),
                confidence: (pos.confidence * pos.expertise_score.unwrap_or(0.7)).min(1.0),
                reasoning: format!("Resolved based on expertise of {}", pos.bot_id),
                dissent: summarize_dissent(&disagreement.positions, &pos.position),
                escalated: false,
                timestamp: Utc::now(),
            },
            _ => Decision {
                id: Uuid::new_v4().to_string(),
                task_id: disagreement.task_id.clone(),
                decision_type: DecisionType::DisputeResolution,
                participants: disagreement
                    .positions
                    .iter()
                    .map(|p| p.bot_id.clone())
                    .collect(),
                positions: disagreement.positions.clone(),
                final_decision: "escalate to user".to_string(),
                confidence: 0.3,
                reasoning: "No consensus and no expert available".to_string(),
                dissent: None,
                escalated: true,
                timestamp: Utc::now(),
            },
        };

        self.decisions
            .lock()
            .unwrap()
            .insert(decision.id.clone(), decision.clone());
        decision
    }

    /// Mark a decision escalated, annotating the reasoning.
    pub fn escalate(&self, decision_id: &str, reason: &str) -> Result<Decision> {
        let mut decisions = self.decisions.lock().unwrap();
        let decision =
            decisions
                .get_mut(decision_id)
                .ok_or_else(|| CoordinatorError::DecisionNotFound {
                    id: decision_id.to_string(),
                })?;
        decision.escalated = true;
        if !reason.is_empty() {
            decision.reasoning.push_str(&format!("\n[ESCALATED: {reason}]"));
        }
        Ok(decision.clone())
    }

    pub fn get_decision(&self, decision_id: &str) -> Option<Decision> {
        self.decisions.lock().unwrap().get(decision_id).cloned()
    }

    pub fn decisions_for_task(&self, task_id: &TaskId) -> Vec<Decision> {
        self.decisions
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.task_id.as_ref() == Some(task_id))
            .cloned()
            .collect()
    }
}

fn resolve_vote(
    weights: &[f64],
    counts: &[usize],
    participant_count: usize,
    strategy: VotingStrategy,
) -> usize {
    let highest_weight = || {
        weights
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };

    match strategy {
        VotingStrategy::Unanimous => counts
            .iter()
            .position(|&c| c == participant_count)
            .unwrap_or_else(highest_weight),
        VotingStrategy::Majority => {
            let threshold = participant_count as f64 / 2.0;
            counts
                .iter()
                .enumerate()
                .filter(|(_, &c)| c as f64 > threshold)
                .max_by_key(|(_, &c)| c)
                .map(|(i, _)| i)
                .unwrap_or_else(highest_weight)
        }
        VotingStrategy::Weighted => highest_weight(),
        VotingStrategy::Plurality => counts
            .iter()
            .enumerate()
            .max_by_key(|(_, &c)| c)
            .map(|(i, _)| i)
            .unwrap_or(0),
    }
}

fn voting_reasoning(
    positions: &[BotPosition],
    final_decision: &str,
    strategy: VotingStrategy,
) -> String {
    let mut lines = vec![
        format!("Decision made using {strategy} voting."),
        format!("Final decision: {final_decision}"),
        "Positions:".to_string(),
    ];
    for pos in positions {
        lines.push(format!(
            "  - {}: {} (confidence: {:.0}%)",
            pos.bot_id,
            pos.position,
            pos.confidence * 100.0
        ));
    }
    lines.join("\n")
}

/// Always lists every non-chosen position.
fn summarize_dissent(positions: &[BotPosition], chosen: &str) -> Option<String> {
    let dissenters: Vec<String> = positions
        .iter()
        .filter(|p| p.position != chosen)
        .map(|p| format!("{}: {} (confidence: {:.0}%)", p.bot_id, p.position, p.confidence * 100.0))
        .collect();
    if dissenters.is_empty() {
        None
    } else {
        Some(format!(
            "Dissenting views ({} bots): {}",
            dissenters.len(),
            dissenters.join("; ")
        ))
    }
}

/// Shared themes across position reasonings, from the fixed keyword set.
pub fn find_common_ground(positions: &[BotPosition]) -> String {
    let reasonings: Vec<String> = positions.iter().map(|p| p.reasoning.to_lowercase()).collect();
    if reasonings.is_empty() {
        return String::new();
    }

    let shared: Vec<String> = COMMON_GROUND_THEMES
        .iter()
        .filter(|theme| {
            let hits = reasonings.iter().filter(|r| r.contains(*theme)).count();
            hits as f64 > reasonings.len() as f64 / 2.0
        })
        .map(|theme| format!("shared {theme}"))
        .collect();

    if shared.is_empty() {
        "Both positions aim to improve coordination".to_string()
    } else {
        format!("Despite disagreement, positions share: {}", shared.join(", "))
    }
}

/// Detects and classifies disagreements.
pub struct DisputeResolver {
    disagreements: Mutex<HashMap<String, Disagreement>>,
}

impl Default for DisputeResolver {
    fn default() -> Self {
        Self {
            disagreements: Mutex::new(HashMap::new()),
        }
    }
}

impl DisputeResolver {
    /// A disagreement exists iff two or more distinct position texts are
    /// held. Returns None on alignment.
    pub fn detect(&self, positions: &[BotPosition], task_id: Option<TaskId>) -> Option<Disagreement> {
        if positions.len() < 2 {
            return None;
        }
        let mut distinct: Vec<&str> = positions.iter().map(|p| p.position.as_str()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() <= 1 {
            return None;
        }

        let disagreement = Disagreement {
            id: Uuid::new_v4().to_string(),
            task_id,
            disagreement_type: infer_type(positions),
            positions: positions.to_vec(),
            common_ground: find_common_ground(positions),
            severity: 0.5,
            timestamp: Utc::now(),
        };
        self.disagreements
            .lock()
            .unwrap()
            .insert(disagreement.id.clone(), disagreement.clone());
        Some(disagreement)
    }

    pub fn get(&self, id: &str) -> Option<Disagreement> {
        self.disagreements.lock().unwrap().get(id).cloned()
    }

    pub fn for_task(&self, task_id: &TaskId) -> Vec<Disagreement> {
        self.disagreements
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.task_id.as_ref() == Some(task_id))
            .cloned()
            .collect()
    }
}

/// Keyword heuristics over the combined reasoning text.
fn infer_type(positions: &[BotPosition]) -> DisagreementType {
    let combined: String = positions
        .iter()
        .map(|p| p.reasoning.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    if ["how", "method", "approach", "way"]
        .iter()
        .any(|w| combined.contains(w))
    {
        return DisagreementType::Methodological;
    }
    if ["urgent", "priority", "critical", "important"]
        .iter()
        .any(|w| combined.contains(w))
    {
        return DisagreementType::Priority;
    }
    if ["believe", "value", "goal", "principle"]
        .iter()
        .any(|w| combined.contains(w))
    {
        return DisagreementType::Philosophical;
    }
    if ["missing", "lack", "insufficient", "need"]
        .iter()
        .any(|w| combined.contains(w))
    {
        return DisagreementType::IncompleteInfo;
    }
    DisagreementType::Factual
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(opts: &[&str]) -> Vec<String> {
        opts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn weighted_vote_matches_worked_example() {
        // bot1 {A, 0.9, expertise 0.9}, bot2 {B, 0.8, 0.4}, bot3 {A, 0.6, 0.3}
        let positions = vec![
            BotPosition::new("bot1", "A", 0.9, "prefer A").with_expertise(0.9),
            BotPosition::new("bot2", "B", 0.8, "prefer B").with_expertise(0.4),
            BotPosition::new("bot3", "A", 0.6, "prefer A").with_expertise(0.3),
        ];
        let maker = DecisionMaker::default();
        let decision = maker
            .create_vote(&options(&["A", "B", "C"]), &positions, VotingStrategy::Weighted, None)
            .unwrap();

        assert_eq!(decision.final_decision, "A");
        assert_eq!(decision.decision_type, DecisionType::WeightedVote);
        // (0.81 + 0.18) / (0.81 + 0.32 + 0.18)
        let expected = 0.99 / 1.31;
        assert!((decision.confidence - expected).abs() < 1e-9);
        assert!(decision.dissent.as_ref().unwrap().contains("bot2"));
    }

    #[test]
    fn unanimous_falls_back_to_highest_weight() {
        let positions = vec![
            BotPosition::new("b1", "A", 0.9, ""),
            BotPosition::new("b2", "B", 0.4, ""),
        ];
        let maker = DecisionMaker::default();
        let decision = maker
            .create_vote(&options(&["A", "B"]), &positions, VotingStrategy::Unanimous, None)
            .unwrap();
        assert_eq!(decision.final_decision, "A");
    }

    #[test]
    fn majority_requires_strict_majority() {
        // 2 of 4 votes is not a majority; falls back to weight, where A
        // carries more confidence.
        let positions = vec![
            BotPosition::new("b1", "A", 0.9, ""),
            BotPosition::new("b2", "A", 0.8, ""),
            BotPosition::new("b3", "B", 0.5, ""),
            BotPosition::new("b4", "B", 0.5, ""),
        ];
        let maker = DecisionMaker::default();
        let decision = maker
            .create_vote(&options(&["A", "B"]), &positions, VotingStrategy::Majority, None)
            .unwrap();
        assert_eq!(decision.final_decision, "A");

        // 3 of 4 is a majority
        let positions = vec![
            BotPosition::new("b1", "B", 0.2, ""),
            BotPosition::new("b2", "B", 0.2, ""),
            BotPosition::new("b3", "B", 0.2, ""),
            BotPosition::new("b4", "A", 0.9, ""),
        ];
        let decision = maker
            .create_vote(&options(&["A", "B"]), &positions, VotingStrategy::Majority, None)
            .unwrap();
        assert_eq!(decision.final_decision, "B");
    }

    #[test]
    fn plurality_ignores_weights() {
        let positions = vec![
            BotPosition::new("b1", "A", 0.1, ""),
            BotPosition::new("b2", "A", 0.1, ""),
            BotPosition::new("b3", "B", 0.99, ""),
        ];
        let maker = DecisionMaker::default();
        let decision = maker
            .create_vote(&options(&["A", "B"]), &positions, VotingStrategy::Plurality, None)
            .unwrap();
        assert_eq!(decision.final_decision, "A");
    }

    #[test]
    fn vote_rejects_empty_inputs() {
        let maker = DecisionMaker::default();
        assert!(matches!(
            maker.create_vote(&options(&["A"]), &[], VotingStrategy::Majority, None),
            Err(CoordinatorError::NoPositions)
        ));
        let positions = vec![BotPosition::new("b1", "A", 0.5, "")];
        assert!(matches!(
            maker.create_vote(&[], &positions, VotingStrategy::Majority, None),
            Err(CoordinatorError::NoOptions)
        ));
    }

    #[test]
    fn consensus_at_threshold() {
        let maker = DecisionMaker::default();
        let positions = vec![
            BotPosition::new("b1", "ship it", 0.8, ""),
            BotPosition::new("b2", "ship it", 0.7, ""),
            BotPosition::new("b3", "ship it", 0.9, ""),
            BotPosition::new("b4", "hold", 0.9, ""),
        ];
        // 3/4 = 0.75 < 0.8 default
        assert_eq!(maker.get_consensus(&positions, 0.8), None);
        assert_eq!(
            maker.get_consensus(&positions, 0.7),
            Some("ship it".to_string())
        );
    }

    #[test]
    fn dispute_detection_and_type_inference() {
        let resolver = DisputeResolver::default();

        let aligned = vec![
            BotPosition::new("b1", "A", 0.8, "same"),
            BotPosition::new("b2", "A", 0.7, "same"),
        ];
        assert!(resolver.detect(&aligned, None).is_none());

        let split = vec![
            BotPosition::new("b1", "A", 0.8, "this approach is cleaner"),
            BotPosition::new("b2", "B", 0.7, "the method scales better"),
        ];
        let disagreement = resolver.detect(&split, None).unwrap();
        assert_eq!(
            disagreement.disagreement_type,
            DisagreementType::Methodological
        );
    }

    #[test]
    fn dispute_resolution_prefers_expert() {
        let maker = DecisionMaker::default();
        let resolver = DisputeResolver::default();

        let positions = vec![
            BotPosition::new("junior", "A", 0.95, "fact: it was faster").with_expertise(0.2),
            BotPosition::new("senior", "B", 0.7, "fact: benchmarks differ").with_expertise(0.9),
        ];
        let disagreement = resolver.detect(&positions, None).unwrap();
        let decision = maker.resolve_dispute(&disagreement, 0.8);

        assert_eq!(decision.decision_type, DecisionType::ExpertiseBased);
        assert_eq!(decision.final_decision, "B");
        assert!((decision.confidence - 0.7 * 0.9).abs() < 1e-9);
        assert!(decision.dissent.as_ref().unwrap().contains("junior"));
    }

    #[test]
    fn dispute_without_experts_escalates() {
        let maker = DecisionMaker::default();
        let resolver = DisputeResolver::default();

        let positions = vec![
            BotPosition::new("b1", "A", 0.5, "fact x"),
            BotPosition::new("b2", "B", 0.5, "fact y"),
        ];
        let disagreement = resolver.detect(&positions, None).unwrap();
        let decision = maker.resolve_dispute(&disagreement, 0.8);

        assert_eq!(decision.final_decision, "escalate to user");
        assert!(decision.escalated);
    }

    #[test]
    fn common_ground_uses_fixed_theme_set() {
        let positions = vec![
            BotPosition::new("b1", "A", 0.8, "the goal is reliability"),
            BotPosition::new("b2", "B", 0.7, "our goal needs speed"),
        ];
        let ground = find_common_ground(&positions);
        assert!(ground.contains("shared goal"));

        let no_overlap = vec![
            BotPosition::new("b1", "A", 0.8, "x"),
            BotPosition::new("b2", "B", 0.7, "y"),
        ];
        assert_eq!(
            find_common_ground(&no_overlap),
            "Both positions aim to improve coordination"
        );
    }

    #[test]
    fn escalate_annotates_reasoning() {
        let maker = DecisionMaker::default();
        let positions = vec![BotPosition::new("b1", "A", 0.5, "")];
        let decision = maker
            .create_vote(&options(&["A"]), &positions, VotingStrategy::Majority, None)
            .unwrap();
        let escalated = maker.escalate(&decision.id, "low confidence").unwrap();
        assert!(escalated.escalated);
        assert!(escalated.reasoning.contains("[ESCALATED: low confidence]"));
    }
}
