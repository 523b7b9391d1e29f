//! Append-only audit trail with task and agent indexes.
//!
//! Every state-changing coordinator action appends one event; events are
//! immutable once logged and are emitted after the state change they
//! record.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use troupe_core::{AgentId, TaskId};

/// Types of events captured in the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    DecisionMade,
    BotSelection,
    ConsensusReached,
    DisputeDetected,
    DisputeResolved,
    TaskAssigned,
    TaskCompleted,
    TaskFailed,
    Escalation,
    MessageSent,
    Voting,
    Reasoning,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DecisionMade => "decision_made",
            Self::BotSelection => "bot_selection",
            Self::ConsensusReached => "consensus_reached",
            Self::DisputeDetected => "dispute_detected",
            Self::DisputeResolved => "dispute_resolved",
            Self::TaskAssigned => "task_assigned",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::Escalation => "escalation",
            Self::MessageSent => "message_sent",
            Self::Voting => "voting",
            Self::Reasoning => "reasoning",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A single event in the audit trail: what happened, who was involved,
/// why, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<TaskId>,
    pub bot_ids: Vec<AgentId>,
    pub description: String,
    pub reasoning: String,
    pub details: BTreeMap<String, serde_json::Value>,
    pub severity: AuditSeverity,
    pub confidence: f64,
    pub related_event_ids: Vec<String>,
    pub escalated: bool,
    pub escalation_reason: Option<String>,
}

/// Comprehensive record of one coordination decision.
///
/// Where [`AuditEvent`] captures that *a* decision happened, this keeps
/// the full picture for transparency reviews: what was on the table, who
/// stood where, which process chose the winner, and the step-by-step
/// reasoning. Logged alongside its `decision_made` event by
/// [`AuditTrail::log_decision`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionAuditRecord {
    pub id: String,
    /// Id of the originating `Decision`.
    pub decision_id: String,
    pub timestamp: DateTime<Utc>,

    pub final_decision: String,
    pub confidence: f64,
    pub task_id: Option<TaskId>,

    pub participants: Vec<AgentId>,
    /// agent id -> expertise score, where known.
    pub expertises: BTreeMap<String, f64>,

    /// Every option that was considered.
    pub options: Vec<String>,
    /// agent id -> position text.
    pub positions: BTreeMap<String, String>,

    /// consensus | dispute_resolution | expertise_based | weighted_vote
    pub process_type: String,
    pub reasoning: String,
    pub reasoning_steps: Vec<String>,

    pub dissenting_views: Vec<String>,
    pub concerns_raised: Vec<String>,

    /// Filled in later when the decision's outcome is known.
    pub outcome: Option<String>,
    pub outcome_verified: bool,
}

/// Builder-ish argument bundle for [`AuditTrail::log_event`].
#[derive(Debug, Default)]
pub struct EventDraft {
    pub task_id: Option<TaskId>,
    pub bot_ids: Vec<AgentId>,
    pub reasoning: String,
    pub details: BTreeMap<String, serde_json::Value>,
    pub severity: AuditSeverity,
    pub confidence: f64,
    pub related_event_ids: Vec<String>,
}

/// Filters for exporting a slice of the trail.
#[derive(Debug, Default, Clone)]
pub struct ExportFilter {
    pub task_id: Option<TaskId>,
    pub bot_id: Option<AgentId>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Aggregate statistics over the trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_events: usize,
    pub total_decisions: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub events_by_severity: BTreeMap<String, usize>,
    pub tasks_audited: usize,
    pub bots_audited: usize,
    pub escalations: usize,
    /// Events with confidence >= 0.8.
    pub high_confidence_events: usize,
}

struct Inner {
    events: Vec<AuditEvent>,
    decisions: HashMap<String, DecisionAuditRecord>,
    by_task: HashMap<String, Vec<usize>>,
    by_bot: HashMap<String, Vec<usize>>,
}

/// The audit trail. Append-only: there is no mutation or removal API.
pub struct AuditTrail {
    inner: Mutex<Inner>,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                decisions: HashMap::new(),
                by_task: HashMap::new(),
                by_bot: HashMap::new(),
            }),
        }
    }
}

impl AuditTrail {
    /// Append an event; returns its id.
    pub fn log_event(
        &self,
        event_type: AuditEventType,
        description: &str,
        draft: EventDraft,
    ) -> String {
        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            task_id: draft.task_id,
            bot_ids: draft.bot_ids,
            description: description.to_string(),
            reasoning: draft.reasoning,
            details: draft.details,
            severity: draft.severity,
            confidence: draft.confidence,
            related_event_ids: draft.related_event_ids,
            escalated: event_type == AuditEventType::Escalation,
            escalation_reason: None,
        };
        self.push(event)
    }

    /// Store a comprehensive decision record and emit its associated
    /// `decision_made` event. Returns the record id.
    pub fn log_decision(&self, record: DecisionAuditRecord) -> String {
        let record_id = record.id.clone();

        let mut details = BTreeMap::new();
        details.insert(
            "decision_audit_id".to_string(),
            serde_json::json!(record.id),
        );
        details.insert(
            "decision_id".to_string(),
            serde_json::json!(record.decision_id),
        );
        details.insert(
            "process_type".to_string(),
            serde_json::json!(record.process_type),
        );
        details.insert("confidence".to_string(), serde_json::json!(record.confidence));

        let draft = EventDraft {
            task_id: record.task_id.clone(),
            bot_ids: record.participants.clone(),
            reasoning: record.reasoning.clone(),
            details,
            confidence: record.confidence,
            ..Default::default()
        };

        self.inner
            .lock()
            .unwrap()
            .decisions
            .insert(record.id.clone(), record.clone());

        self.log_event(
            AuditEventType::DecisionMade,
            &format!("Decision: {}", record.final_decision),
            draft,
        );
        record_id
    }

    pub fn get_decision_record(&self, record_id: &str) -> Option<DecisionAuditRecord> {
        self.inner
            .lock()
            .unwrap()
            .decisions
            .get(record_id)
            .cloned()
    }

    /// Every event referencing a decision (via `decision_id` or
    /// `decision_audit_id` in its details), chronological.
    pub fn get_decision_timeline(&self, decision_id: &str) -> Vec<AuditEvent> {
        let inner = self.inner.lock().unwrap();
        let needle = serde_json::json!(decision_id);
        let mut events: Vec<AuditEvent> = inner
            .events
            .iter()
            .filter(|e| {
                e.details.get("decision_id") == Some(&needle)
                    || e.details.get("decision_audit_id") == Some(&needle)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }

    /// Bot selection with the full per-candidate score map.
    pub fn log_bot_selection(
        &self,
        task_id: &TaskId,
        selected: &AgentId,
        candidates: &[AgentId],
        domain: &str,
        scores: &BTreeMap<String, f64>,
    ) -> String {
        let mut details = BTreeMap::new();
        details.insert("selected_bot".to_string(), serde_json::json!(selected.as_str()));
        details.insert(
            "available_bots".to_string(),
            serde_json::json!(candidates.iter().map(|b| b.as_str()).collect::<Vec<_>>()),
        );
        details.insert("domain".to_string(), serde_json::json!(domain));
        details.insert("expertise_scores".to_string(), serde_json::json!(scores));
        details.insert(
            "selection_method".to_string(),
            serde_json::json!("expertise-based"),
        );

        let selected_score = scores.get(selected.as_str()).copied().unwrap_or(0.5);
        self.log_event(
            AuditEventType::BotSelection,
            &format!("Bot {selected} selected for task {task_id}"),
            EventDraft {
                task_id: Some(task_id.clone()),
                bot_ids: vec![selected.clone()],
                reasoning: format!(
                    "Selected {selected} based on highest expertise score ({selected_score:.2}) in {domain}"
                ),
                details,
                confidence: selected_score,
                ..Default::default()
            },
        )
    }

    /// Team consensus achievement.
    pub fn log_consensus(
        &self,
        task_id: Option<TaskId>,
        decision: &str,
        participants: &[AgentId],
        agreement_rate: f64,
    ) -> String {
        let mut details = BTreeMap::new();
        details.insert("decision".to_string(), serde_json::json!(decision));
        details.insert(
            "agreement_rate".to_string(),
            serde_json::json!(agreement_rate),
        );
        details.insert(
            "participant_count".to_string(),
            serde_json::json!(participants.len()),
        );

        self.log_event(
            AuditEventType::ConsensusReached,
            &format!("Consensus: {decision}"),
            EventDraft {
                task_id,
                bot_ids: participants.to_vec(),
                reasoning: format!(
                    "Team reached {:.0}% agreement on: {decision}",
                    agreement_rate * 100.0
                ),
                details,
                confidence: agreement_rate,
                ..Default::default()
            },
        )
    }

    /// Escalation to the user; warning severity by default.
    pub fn log_escalation(
        &self,
        decision_id: &str,
        reason: &str,
        task_id: Option<TaskId>,
        severity: Option<AuditSeverity>,
    ) -> String {
        let mut details = BTreeMap::new();
        details.insert("decision_id".to_string(), serde_json::json!(decision_id));

        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            event_type: AuditEventType::Escalation,
            timestamp: Utc::now(),
            task_id,
            bot_ids: Vec::new(),
            description: format!("Decision {decision_id} escalated to user"),
            reasoning: reason.to_string(),
            details,
            severity: severity.unwrap_or(AuditSeverity::Warning),
            confidence: 0.0,
            related_event_ids: Vec::new(),
            escalated: true,
            escalation_reason: Some(reason.to_string()),
        };
        self.push(event)
    }

    fn push(&self, event: AuditEvent) -> String {
        let id = event.id.clone();
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.events.len();

        if let Some(task_id) = &event.task_id {
            inner
                .by_task
                .entry(task_id.as_str().to_string())
                .or_default()
                .push(idx);
        }
        for bot in &event.bot_ids {
            inner
                .by_bot
                .entry(bot.as_str().to_string())
                .or_default()
                .push(idx);
        }
        inner.events.push(event);
        id
    }

    /// Events for a task, chronological.
    pub fn task_log(&self, task_id: &TaskId, types: Option<&[AuditEventType]>) -> Vec<AuditEvent> {
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<AuditEvent> = inner
            .by_task
            .get(task_id.as_str())
            .map(|idxs| idxs.iter().map(|&i| inner.events[i].clone()).collect())
            .unwrap_or_default();
        if let Some(types) = types {
            events.retain(|e| types.contains(&e.event_type));
        }
        events.sort_by_key(|e| e.timestamp);
        events
    }

    /// Events involving an agent, chronological.
    pub fn bot_activity(&self, bot: &AgentId, types: Option<&[AuditEventType]>) -> Vec<AuditEvent> {
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<AuditEvent> = inner
            .by_bot
            .get(bot.as_str())
            .map(|idxs| idxs.iter().map(|&i| inner.events[i].clone()).collect())
            .unwrap_or_default();
        if let Some(types) = types {
            events.retain(|e| types.contains(&e.event_type));
        }
        events.sort_by_key(|e| e.timestamp);
        events
    }

    /// Filtered export, chronological.
    pub fn export(&self, filter: &ExportFilter) -> Vec<AuditEvent> {
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<AuditEvent> = inner
            .events
            .iter()
            .filter(|e| {
                if let Some(task_id) = &filter.task_id {
                    if e.task_id.as_ref() != Some(task_id) {
                        return false;
                    }
                }
                if let Some(bot_id) = &filter.bot_id {
                    if !e.bot_ids.contains(bot_id) {
                        return false;
                    }
                }
                if let Some(start) = filter.start {
                    if e.timestamp < start {
                        return false;
                    }
                }
                if let Some(end) = filter.end {
                    if e.timestamp > end {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }

    pub fn stats(&self) -> AuditStats {
        let inner = self.inner.lock().unwrap();
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut escalations = 0;
        let mut high_confidence = 0;

        for event in &inner.events {
            *by_type.entry(event.event_type.to_string()).or_default() += 1;
            *by_severity.entry(event.severity.to_string()).or_default() += 1;
            if event.escalated {
                escalations += 1;
            }
            if event.confidence >= 0.8 {
                high_confidence += 1;
            }
        }

        AuditStats {
            total_events: inner.events.len(),
            total_decisions: inner.decisions.len(),
            events_by_type: by_type,
            events_by_severity: by_severity,
            tasks_audited: inner.by_task.len(),
            bots_audited: inner.by_bot.len(),
            escalations,
            high_confidence_events: high_confidence,
        }
    }
}
