//! The coordinator front: request analysis, task creation and delegation,
//! result handling, decision entry points, and team status.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use troupe_bus::AgentBus;
use troupe_core::{AgentId, AgentMessage, MessageType, Task, TaskId, TaskStatus};
use troupe_store::{CoordinatorStore, DecisionRecord};

use crate::audit::{AuditEventType, AuditTrail, DecisionAuditRecord, EventDraft};
use crate::decisions::{
    BotPosition, Decision, DecisionMaker, DisputeResolver, VotingStrategy,
};
use crate::error::Result;
use crate::expertise::ExpertiseSource;
use crate::explain::ExplanationEngine;
use crate::liveness::TaskBoard;

/// Estimated request complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Routing analysis for a user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAnalysis {
    pub complexity: Complexity,
    pub domains: Vec<String>,
    pub requires_team: bool,
    /// route_to_specialist | ask_for_clarification |
    /// decompose_and_delegate | parallel_delegation
    pub recommended_approach: String,
}

/// Orchestrates team collaboration: delegates tasks, reconciles results,
/// and runs the decision machinery.
pub struct Coordinator {
    name: AgentId,
    bus: Arc<AgentBus>,
    store: Arc<CoordinatorStore>,
    board: Arc<TaskBoard>,
    expertise: Arc<dyn ExpertiseSource>,
    audit: Arc<AuditTrail>,
    decisions: DecisionMaker,
    disputes: DisputeResolver,
    explainer: ExplanationEngine,
    required_agreement: f64,
}

impl Coordinator {
    pub fn new(
        bus: Arc<AgentBus>,
        store: Arc<CoordinatorStore>,
        board: Arc<TaskBoard>,
        expertise: Arc<dyn ExpertiseSource>,
        audit: Arc<AuditTrail>,
        required_agreement: f64,
    ) -> Self {
        Self {
            name: AgentId::new("leader"),
            bus,
            store,
            board,
            expertise,
            audit,
            decisions: DecisionMaker::default(),
            disputes: DisputeResolver::default(),
            explainer: ExplanationEngine::default(),
            required_agreement,
        }
    }

    pub fn name(&self) -> &AgentId {
        &self.name
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn explainer(&self) -> &ExplanationEngine {
        &self.explainer
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }

    /// Analyze a user request: complexity, domains, and the recommended
    /// delegation approach.
    pub fn analyze_request(&self, content: &str) -> RequestAnalysis {
        let complexity = estimate_complexity(content);
        let domains = extract_domains(content);

        let (requires_team, approach) = match (domains.len(), complexity) {
            (0, _) => (false, "ask_for_clarification"),
            (1, Complexity::High) => (true, "decompose_and_delegate"),
            (1, _) => (false, "route_to_specialist"),
            (_, _) => (true, "parallel_delegation"),
        };

        info!(
            approach,
            domains = domains.len(),
            complexity = %complexity,
            "request analyzed"
        );

        RequestAnalysis {
            complexity,
            domains,
            requires_team,
            recommended_approach: approach.to_string(),
        }
    }

    /// Pick the best bot for a domain: max expertise score, ties broken by
    /// candidate order. The full score map is audited.
    pub fn find_best_bot(&self, domain: &str, candidates: &[AgentId]) -> AgentId {
        if candidates.is_empty() {
            return self.name.clone();
        }

        let scores: BTreeMap<String, f64> = candidates
            .iter()
            .map(|bot| {
                (
                    bot.as_str().to_string(),
                    self.expertise.expertise_score(bot, domain),
                )
            })
            .collect();

        let mut best = candidates[0].clone();
        let mut best_score = scores[best.as_str()];
        for bot in &candidates[1..] {
            let score = scores[bot.as_str()];
            if score > best_score {
                best = bot.clone();
                best_score = score;
            }
        }

        info!(bot = %best, domain, score = best_score, "bot selected");
        self.audit.log_bot_selection(
            &TaskId::from("pending"),
            &best,
            candidates,
            domain,
            &scores,
        );
        self.explainer.explain_bot_selection(&best, domain, &scores);
        best
    }

    /// Create a task, assign it, and notify the assignee over the bus.
    pub fn create_task(
        &self,
        title: &str,
        description: &str,
        domain: &str,
        assigned_to: &AgentId,
        requirements: Vec<String>,
        due_at: Option<DateTime<Utc>>,
        parent_task_id: Option<TaskId>,
    ) -> Result<Task> {
        let mut task = Task::new(title, description, domain);
        task.created_by = Some(self.name.clone());
        task.requirements = requirements;
        task.due_at = due_at;
        task.parent_task_id = parent_task_id;

        let task = self.board.submit(task)?;
        let task = self.board.claim(&task.id, assigned_to)?;

        self.bus.publish(
            AgentMessage::new(
                self.name.clone(),
                assigned_to.clone(),
                MessageType::Request,
                &format!("Task: {title}\n{description}"),
            )
            .with_context("task_id", serde_json::json!(task.id.as_str()))
            .with_context("subject", serde_json::json!(title)),
        );

        info!(task = %task.id, assignee = %assigned_to, title, "task created and delegated");
        Ok(task)
    }

    /// Record a successful task result.
    pub fn handle_task_result(
        &self,
        task_id: &TaskId,
        agent: &AgentId,
        result: &str,
        confidence: f64,
        learnings: Vec<String>,
        follow_ups: Vec<String>,
    ) -> Result<Task> {
        self.board.complete(task_id, agent, result, confidence)?;
        let task = self.board.annotate(task_id, learnings, follow_ups)?;
        info!(
            task = %task_id,
            agent = %agent,
            confidence,
            "task result recorded"
        );
        Ok(task)
    }

    /// Record a task failure; when a recovery suggestion exists the team
    /// is told about it.
    pub fn handle_task_failure(
        &self,
        task_id: &TaskId,
        agent: &AgentId,
        error_text: &str,
        recovery_suggestion: Option<&str>,
    ) -> Result<Task> {
        let task = self.board.fail(task_id, agent, error_text)?;
        warn!(task = %task_id, agent = %agent, error = error_text, "task failed");

        if let Some(suggestion) = recovery_suggestion {
            self.bus.publish(
                AgentMessage::new(
                    self.name.clone(),
                    AgentId::team(),
                    MessageType::Discussion,
                    &format!(
                        "Task '{}' failed. Suggested recovery: {suggestion}",
                        task.title
                    ),
                )
                .with_context("task_id", serde_json::json!(task_id.as_str()))
                .with_context(
                    "subject",
                    serde_json::json!(format!("Task Recovery: {}", task.title)),
                ),
            );
        }

        self.explainer
            .explain_failure(task_id, error_text, agent, 0);
        Ok(task)
    }

    /// Handle a team disagreement over a task. Returns None when the team
    /// is aligned.
    pub fn handle_disagreement(
        &self,
        task_id: &TaskId,
        positions: &[BotPosition],
    ) -> Result<Option<Decision>> {
        let Some(disagreement) = self.disputes.detect(positions, Some(task_id.clone())) else {
            info!("no disagreement detected, team is aligned");
            return Ok(None);
        };

        self.audit.log_event(
            AuditEventType::DisputeDetected,
            &format!(
                "Disagreement ({}) detected on task {task_id}",
                serde_json::to_string(&disagreement.disagreement_type)
                    .unwrap_or_default()
                    .trim_matches('"')
            ),
            EventDraft {
                task_id: Some(task_id.clone()),
                bot_ids: positions.iter().map(|p| p.bot_id.clone()).collect(),
                reasoning: disagreement.common_ground.clone(),
                severity: Default::default(),
                confidence: disagreement.severity,
                ..Default::default()
            },
        );

        let decision = self
            .decisions
            .resolve_dispute(&disagreement, self.required_agreement);
        self.persist_decision(&decision)?;

        self.audit.log_event(
            AuditEventType::DisputeResolved,
            &format!("Dispute on task {task_id} resolved: {}", decision.final_decision),
            EventDraft {
                task_id: Some(task_id.clone()),
                bot_ids: decision.participants.clone(),
                reasoning: decision.reasoning.clone(),
                confidence: decision.confidence,
                ..Default::default()
            },
        );

        if decision.escalated {
            self.audit
                .log_escalation(&decision.id, &decision.reasoning, Some(task_id.clone()), None);
        }

        self.bus.publish(
            AgentMessage::new(
                self.name.clone(),
                AgentId::team(),
                MessageType::Discussion,
                &format!(
                    "Disagreement resolved on task '{task_id}':\nDecision: {}\nConfidence: {:.0}%",
                    decision.final_decision,
                    decision.confidence * 100.0
                ),
            )
            .with_context("task_id", serde_json::json!(task_id.as_str()))
            .with_context("decision_id", serde_json::json!(decision.id)),
        );

        info!(
            task = %task_id,
            decision = %decision.final_decision,
            confidence = decision.confidence,
            "disagreement handled"
        );
        Ok(Some(decision))
    }

    /// Run a weighted vote over `options` and persist the outcome.
    pub fn make_weighted_decision(
        &self,
        options: &[String],
        task_id: &TaskId,
        positions: &[BotPosition],
    ) -> Result<Decision> {
        let decision = self.decisions.create_vote(
            options,
            positions,
            VotingStrategy::Weighted,
            Some(task_id.clone()),
        )?;
        self.persist_decision(&decision)?;

        self.audit.log_event(
            AuditEventType::Voting,
            &format!("Weighted vote on task {task_id}: {}", decision.final_decision),
            EventDraft {
                task_id: Some(task_id.clone()),
                bot_ids: decision.participants.clone(),
                reasoning: decision.reasoning.clone(),
                confidence: decision.confidence,
                ..Default::default()
            },
        );
        Ok(decision)
    }

    /// Try to extract consensus from the positions; broadcast and audit
    /// when one exists.
    pub fn gather_consensus(
        &self,
        question: &str,
        task_id: Option<TaskId>,
        positions: &[BotPosition],
    ) -> Option<String> {
        let consensus = self
            .decisions
            .get_consensus(positions, self.required_agreement)?;

        let supporters = positions
            .iter()
            .filter(|p| p.position == consensus)
            .count();
        let agreement_rate = supporters as f64 / positions.len() as f64;

        self.audit.log_consensus(
            task_id,
            &consensus,
            &positions.iter().map(|p| p.bot_id.clone()).collect::<Vec<_>>(),
            agreement_rate,
        );

        self.bus.publish(
            AgentMessage::new(
                self.name.clone(),
                AgentId::team(),
                MessageType::Discussion,
                &format!("Team consensus on '{question}':\nDecision: {consensus}"),
            )
            .with_context("subject", serde_json::json!("Team Consensus")),
        );

        Some(consensus)
    }

    /// Escalate a decision to the user.
    pub fn escalate_decision(&self, decision_id: &str, reason: &str) -> Result<Decision> {
        let decision = self.decisions.escalate(decision_id, reason)?;
        self.audit
            .log_escalation(decision_id, reason, decision.task_id.clone(), None);
        Ok(decision)
    }

    /// Broadcast a message to the whole team.
    pub fn broadcast(&self, content: &str, message_type: MessageType) -> troupe_core::MessageId {
        self.bus.publish(
            AgentMessage::new(self.name.clone(), AgentId::team(), message_type, content)
                .with_context("subject", serde_json::json!("Team announcement")),
        )
    }

    /// Rendered team status: tasks by state plus registered agents.
    pub fn team_status(&self) -> Result<String> {
        let in_progress = self.store.get_tasks_by_status(TaskStatus::InProgress, 100)?;
        let completed = self.store.get_tasks_by_status(TaskStatus::Completed, 100)?;
        let failed = self.store.get_tasks_by_status(TaskStatus::Failed, 100)?;

        let mut lines = vec![
            "=== Team Status ===".to_string(),
            format!(
                "Active: {} | Completed: {} | Failed: {}",
                in_progress.len(),
                completed.len(),
                failed.len()
            ),
        ];

        let agents = self.bus.list_agents();
        lines.push(format!("Team members: {}", agents.len()));
        for agent in &agents {
            lines.push(format!(
                "  - {} ({}): {} messages",
                agent.name, agent.id, agent.messages_sent
            ));
        }

        if !in_progress.is_empty() {
            lines.push(String::new());
            lines.push("In progress:".to_string());
            for task in in_progress.iter().take(3) {
                let assignee = task
                    .assigned_to
                    .as_ref()
                    .map(|a| a.as_str())
                    .unwrap_or("nobody");
                lines.push(format!("  - {} (assigned to {assignee})", task.title));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Entry point for system-scoped scheduled work: analyze and report.
    pub fn process_system_message(&self, content: &str, session_key: &str) -> Result<String> {
        let analysis = self.analyze_request(content);
        let mut parts = vec![
            format!(
                "Analyzed request ({} complexity) in session {session_key}.",
                analysis.complexity
            ),
            format!(
                "Domains involved: {}",
                if analysis.domains.is_empty() {
                    "general".to_string()
                } else {
                    analysis.domains.join(", ")
                }
            ),
            format!(
                "Approach: {}",
                analysis.recommended_approach.replace('_', " ")
            ),
        ];
        if analysis.requires_team {
            parts.push("Coordinating with the team to handle this.".to_string());
        }
        Ok(parts.join("\n"))
    }

    fn persist_decision(&self, decision: &Decision) -> Result<()> {
        let positions: BTreeMap<String, String> = decision
            .positions
            .iter()
            .map(|p| (p.bot_id.as_str().to_string(), p.position.clone()))
            .collect();

        let record = DecisionRecord {
            id: decision.id.clone(),
            decision_type: decision.decision_type.to_string(),
            task_id: decision.task_id.clone(),
            participants: decision
                .participants
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            positions: positions.clone(),
            reasoning: decision.reasoning.clone(),
            final_decision: decision.final_decision.clone(),
            confidence: decision.confidence,
            dissent: decision.dissent.clone(),
            escalated: decision.escalated,
            timestamp: decision.timestamp,
        };
        self.store.save_decision(&record)?;

        // options considered: distinct position texts in submission order
        let mut options = Vec::new();
        for position in &decision.positions {
            if !options.contains(&position.position) {
                options.push(position.position.clone());
            }
        }
        let dissenting_views: Vec<String> = decision
            .positions
            .iter()
            .filter(|p| p.position != decision.final_decision)
            .map(|p| format!("{}: {}", p.bot_id, p.position))
            .collect();

        self.audit.log_decision(DecisionAuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            decision_id: decision.id.clone(),
            timestamp: decision.timestamp,
            final_decision: decision.final_decision.clone(),
            confidence: decision.confidence,
            task_id: decision.task_id.clone(),
            participants: decision.participants.clone(),
            expertises: decision
                .positions
                .iter()
                .filter_map(|p| {
                    p.expertise_score
                        .map(|score| (p.bot_id.as_str().to_string(), score))
                })
                .collect(),
            options,
            positions,
            process_type: decision.decision_type.to_string(),
            reasoning: decision.reasoning.clone(),
            reasoning_steps: decision
                .reasoning
                .lines()
                .map(|line| line.to_string())
                .collect(),
            dissenting_views,
            concerns_raised: Vec::new(),
            outcome: None,
            outcome_verified: false,
        });
        Ok(())
    }
}

fn estimate_complexity(content: &str) -> Complexity {
    const HIGH: [&str; 5] = ["analyze", "design", "architect", "recommend", "comprehensive"];
    const MEDIUM: [&str; 5] = ["implement", "review", "check", "update", "modify"];
    const LOW: [&str; 4] = ["fetch", "list", "get", "find"];

    let lower = content.to_lowercase();
    if HIGH.iter().any(|k| lower.contains(k)) {
        return Complexity::High;
    }
    if MEDIUM.iter().any(|k| lower.contains(k)) {
        return Complexity::Medium;
    }
    if LOW.iter().any(|k| lower.contains(k)) {
        return Complexity::Low;
    }
    match content.len() {
        0..=100 => Complexity::Low,
        101..=200 => Complexity::Medium,
        _ => Complexity::High,
    }
}

fn extract_domains(content: &str) -> Vec<String> {
    const DOMAIN_KEYWORDS: [(&str, &[&str]); 5] = [
        (
            "research",
            &["research", "investigate", "analyze", "study", "explore"],
        ),
        (
            "development",
            &["build", "implement", "code", "develop", "create"],
        ),
        (
            "community",
            &["community", "social", "engagement", "communication"],
        ),
        ("design", &["design", "ui", "ux", "interface", "visual"]),
        ("quality", &["test", "review", "audit", "check", "verify"]),
    ];

    let lower = content.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(domain, _)| domain.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expertise::StaticExpertise;
    use crate::liveness::LivenessConfig;
    use rusqlite::Connection;

    fn coordinator(expertise: StaticExpertise) -> Coordinator {
        let store = Arc::new(CoordinatorStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let bus = Arc::new(AgentBus::default());
        for (name, domain) in [
            ("leader", "coordination"),
            ("researcher", "research"),
            ("coder", "development"),
            ("auditor", "quality"),
        ] {
            bus.register_agent(AgentId::new(name), name, domain);
        }
        let audit = Arc::new(AuditTrail::default());
        let board = Arc::new(TaskBoard::new(
            store.clone(),
            audit.clone(),
            LivenessConfig::default(),
        ));
        Coordinator::new(bus, store, board, Arc::new(expertise), audit, 0.8)
    }

    #[test]
    fn request_analysis_routes_by_domain_count() {
        let coord = coordinator(StaticExpertise::new(0.5));

        let single = coord.analyze_request("implement the login endpoint");
        assert_eq!(single.domains, vec!["development".to_string()]);
        assert!(!single.requires_team);
        assert_eq!(single.recommended_approach, "route_to_specialist");

        let multi = coord.analyze_request("research the market and build a prototype");
        assert!(multi.domains.len() >= 2);
        assert!(multi.requires_team);
        assert_eq!(multi.recommended_approach, "parallel_delegation");

        let vague = coord.analyze_request("hmm");
        assert_eq!(vague.recommended_approach, "ask_for_clarification");
    }

    #[test]
    fn best_bot_wins_on_score_with_insertion_order_ties() {
        let mut expertise = StaticExpertise::new(0.3);
        expertise.set("coder", "development", 0.9);
        expertise.set("researcher", "development", 0.9);
        let coord = coordinator(expertise);

        // researcher first in candidate order wins the tie
        let best = coord.find_best_bot(
            "development",
            &[AgentId::new("researcher"), AgentId::new("coder")],
        );
        assert_eq!(best, AgentId::new("researcher"));

        // audit captured the selection with the full score map
        let activity = coord.audit().bot_activity(&AgentId::new("researcher"), None);
        assert_eq!(activity.len(), 1);
        assert!(activity[0].details.contains_key("expertise_scores"));
    }

    #[test]
    fn create_task_notifies_assignee() {
        let coord = coordinator(StaticExpertise::new(0.5));
        let coder = AgentId::new("coder");
        let task = coord
            .create_task(
                "Build parser",
                "Parse the things",
                "development",
                &coder,
                vec!["tests".to_string()],
                None,
                None,
            )
            .unwrap();

        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_to, Some(coder.clone()));

        let inbox = coord.bus.inbox(&coder);
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].content.starts_with("Task: Build parser"));
        assert_eq!(
            inbox[0].context.get("task_id"),
            Some(&serde_json::json!(task.id.as_str()))
        );
    }

    #[test]
    fn result_handling_records_learnings() {
        let coord = coordinator(StaticExpertise::new(0.5));
        let coder = AgentId::new("coder");
        let task = coord
            .create_task("t", "d", "development", &coder, vec![], None, None)
            .unwrap();
        coord.board().start(&task.id, &coder).unwrap();

        let done = coord
            .handle_task_result(
                &task.id,
                &coder,
                "shipped",
                0.92,
                vec!["edge cases matter".to_string()],
                vec!["add docs".to_string()],
            )
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.learnings.len(), 1);
        assert_eq!(done.follow_ups, vec!["add docs".to_string()]);
    }

    #[test]
    fn failure_with_recovery_suggestion_reaches_team() {
        let coord = coordinator(StaticExpertise::new(0.5));
        let coder = AgentId::new("coder");
        let task = coord
            .create_task("t", "d", "development", &coder, vec![], None, None)
            .unwrap();

        coord
            .handle_task_failure(&task.id, &coder, "oom", Some("use streaming"))
            .unwrap();

        // broadcast reaches everyone but the leader
        let inbox = coord.bus.inbox(&AgentId::new("researcher"));
        assert!(inbox
            .iter()
            .any(|m| m.content.contains("Suggested recovery: use streaming")));
    }

    #[test]
    fn weighted_decision_is_persisted() {
        let coord = coordinator(StaticExpertise::new(0.5));
        let task_id = TaskId::new();
        let positions = vec![
            BotPosition::new("bot1", "A", 0.9, "a").with_expertise(0.9),
            BotPosition::new("bot2", "B", 0.8, "b").with_expertise(0.4),
            BotPosition::new("bot3", "A", 0.6, "a").with_expertise(0.3),
        ];
        let decision = coord
            .make_weighted_decision(
                &["A".to_string(), "B".to_string(), "C".to_string()],
                &task_id,
                &positions,
            )
            .unwrap();
        assert_eq!(decision.final_decision, "A");

        let stored = coord.store.get_decisions_for_task(&task_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].decision_type, "weighted_vote");
        assert!((stored[0].confidence - decision.confidence).abs() < 1e-9);

        // the comprehensive audit record exists alongside the event
        let timeline = coord.audit().get_decision_timeline(&decision.id);
        assert_eq!(timeline.len(), 1);
        let record_id = timeline[0].details["decision_audit_id"].as_str().unwrap();
        let record = coord.audit().get_decision_record(record_id).unwrap();
        assert_eq!(record.process_type, "weighted_vote");
        assert_eq!(record.options, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(record.positions["bot2"], "B");
        assert!(record
            .dissenting_views
            .iter()
            .any(|v| v.contains("bot2: B")));
        assert!((record.expertises["bot1"] - 0.9).abs() < 1e-9);
        assert!(!record.reasoning_steps.is_empty());
    }

    #[test]
    fn disagreement_resolution_is_audited_and_broadcast() {
        let coord = coordinator(StaticExpertise::new(0.5));
        let task_id = TaskId::new();
        let positions = vec![
            BotPosition::new("coder", "rewrite", 0.8, "the approach is dated").with_expertise(0.9),
            BotPosition::new("auditor", "patch", 0.7, "a patch is the safer way").with_expertise(0.5),
        ];

        let decision = coord
            .handle_disagreement(&task_id, &positions)
            .unwrap()
            .unwrap();
        assert_eq!(decision.final_decision, "rewrite");

        let log = coord.audit().task_log(&task_id, None);
        let types: Vec<AuditEventType> = log.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&AuditEventType::DisputeDetected));
        assert!(types.contains(&AuditEventType::DisputeResolved));
        assert!(types.contains(&AuditEventType::DecisionMade));

        // aligned team produces no decision
        let aligned = vec![
            BotPosition::new("coder", "patch", 0.8, "x"),
            BotPosition::new("auditor", "patch", 0.7, "y"),
        ];
        assert!(coord.handle_disagreement(&task_id, &aligned).unwrap().is_none());
    }

    #[test]
    fn consensus_gathering_broadcasts_on_agreement() {
        let coord = coordinator(StaticExpertise::new(0.5));
        let positions = vec![
            BotPosition::new("coder", "ship", 0.9, ""),
            BotPosition::new("auditor", "ship", 0.8, ""),
            BotPosition::new("researcher", "ship", 0.7, ""),
        ];
        let consensus = coord.gather_consensus("release?", None, &positions);
        assert_eq!(consensus, Some("ship".to_string()));

        let split = vec![
            BotPosition::new("coder", "ship", 0.9, ""),
            BotPosition::new("auditor", "hold", 0.8, ""),
        ];
        assert_eq!(coord.gather_consensus("release?", None, &split), None);
    }

    #[test]
    fn system_message_produces_analysis_text() {
        let coord = coordinator(StaticExpertise::new(0.5));
        let response = coord
            .process_system_message("review the audit findings", "routine_42")
            .unwrap();
        assert!(response.contains("quality"));
        assert!(response.contains("routine_42"));
    }
}
