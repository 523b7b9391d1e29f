use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a specialist agent (researcher, coder, social, creative,
/// auditor, leader, …). The reserved value `team` addresses everyone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Reserved broadcast recipient.
    pub fn team() -> Self {
        Self("team".to_string())
    }

    pub fn is_team(&self) -> bool {
        self.0 == "team"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

uuid_id!(
    /// Unique message identifier (UUID v4 string).
    MessageId
);
uuid_id!(
    /// Conversation thread identifier. Stable across threading.
    ConversationId
);
uuid_id!(
    /// Task identifier. Reassignment after timeout reuses the same id, which
    /// is what makes at-least-once delivery idempotent.
    TaskId
);

/// Named room identifier (e.g. `general`, `project-website`). Human-chosen,
/// not a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Cost/latency class assigned to a message; controls which backend model
/// handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingTier {
    Simple,
    Medium,
    Coding,
    Complex,
    Reasoning,
}

impl RoutingTier {
    /// Token bucket for responses in this tier.
    pub fn estimated_tokens(&self) -> u32 {
        match self {
            Self::Simple => 50,
            Self::Medium => 200,
            Self::Coding => 800,
            Self::Complex => 1000,
            Self::Reasoning => 2000,
        }
    }

    /// Layer-1 confidence required to skip the assisted classifier.
    pub fn default_threshold(&self) -> f64 {
        match self {
            Self::Simple => 0.0,
            Self::Medium => 0.5,
            Self::Complex => 0.85,
            Self::Coding => 0.90,
            Self::Reasoning => 0.97,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Complex | Self::Reasoning)
    }

    pub fn all() -> [RoutingTier; 5] {
        [
            Self::Simple,
            Self::Medium,
            Self::Coding,
            Self::Complex,
            Self::Reasoning,
        ]
    }
}

impl fmt::Display for RoutingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Coding => "coding",
            Self::Complex => "complex",
            Self::Reasoning => "reasoning",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RoutingTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "medium" => Ok(Self::Medium),
            "coding" => Ok(Self::Coding),
            "complex" => Ok(Self::Complex),
            "reasoning" => Ok(Self::Reasoning),
            other => Err(format!("unknown routing tier: {other}")),
        }
    }
}

/// What an inter-agent message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Agent requesting help from another.
    Request,
    /// Direct response to a request.
    Response,
    /// Status update or completion report.
    Report,
    /// Contribution to a team discussion.
    Discussion,
    /// Message to all agents.
    Broadcast,
    /// Request for clarification.
    Clarification,
    /// Agreement with a proposal.
    Agreement,
    /// Disagreement with a proposal.
    Disagreement,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Report => "report",
            Self::Discussion => "discussion",
            Self::Broadcast => "broadcast",
            Self::Clarification => "clarification",
            Self::Agreement => "agreement",
            Self::Disagreement => "disagreement",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            "report" => Ok(Self::Report),
            "discussion" => Ok(Self::Discussion),
            "broadcast" => Ok(Self::Broadcast),
            "clarification" => Ok(Self::Clarification),
            "agreement" => Ok(Self::Agreement),
            "disagreement" => Ok(Self::Disagreement),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// A message between agents.
///
/// Carries its conversation id so threading survives persistence; the id is
/// generated on construction when the caller does not supply one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: MessageId,
    pub sender: AgentId,
    /// A specific agent, or [`AgentId::team`] for broadcast.
    pub recipient: AgentId,
    pub message_type: MessageType,
    pub content: String,
    pub conversation_id: ConversationId,
    /// Opaque metadata (subject, task_id, delivery hints, …).
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// For responses: the request message this answers.
    pub response_to: Option<MessageId>,
}

impl AgentMessage {
    pub fn new(sender: AgentId, recipient: AgentId, message_type: MessageType, content: &str) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            recipient,
            message_type,
            content: content.to_string(),
            conversation_id: ConversationId::new(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
            response_to: None,
        }
    }

    pub fn in_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    /// Subject hint carried in context, if any.
    pub fn subject(&self) -> Option<&str> {
        self.context.get("subject").and_then(|v| v.as_str())
    }
}

/// A conversation thread between agents.
///
/// Messages are append-only; `last_message_at` is monotonic. The sticky
/// routing tier lives here rather than in per-message metadata so the
/// router's conversation state survives restarts with the thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub initiated_by: AgentId,
    pub subject: String,
    pub messages: Vec<AgentMessage>,
    /// Union of senders and non-broadcast recipients, in first-seen order.
    pub participants: Vec<AgentId>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    /// Highest recently-held routing tier, maintained by the sticky router.
    pub sticky_tier: Option<RoutingTier>,
}

impl Conversation {
    pub fn new(id: ConversationId, initiated_by: AgentId, subject: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            initiated_by,
            subject: subject.to_string(),
            messages: Vec::new(),
            participants: Vec::new(),
            created_at: now,
            last_message_at: now,
            sticky_tier: None,
        }
    }

    /// Append a message and track participants. `last_message_at` never
    /// moves backwards even if the message carries an older timestamp.
    pub fn push(&mut self, message: AgentMessage) {
        if message.timestamp > self.last_message_at {
            self.last_message_at = message.timestamp;
        }
        if !self.participants.contains(&message.sender) {
            self.participants.push(message.sender.clone());
        }
        if !message.recipient.is_team() && !self.participants.contains(&message.recipient) {
            self.participants.push(message.recipient.clone());
        }
        self.messages.push(message);
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by an agent but not started.
    Assigned,
    /// The owning agent is working on it.
    InProgress,
    /// Waiting on a dependency.
    Blocked,
    Completed,
    Failed,
    Cancelled,
    /// Declared dead by the liveness monitor.
    Timeout,
}

impl TaskStatus {
    /// Terminal states set `completed_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Task priority levels. The numeric values are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn value(&self) -> i64 {
        match self {
            Self::Low => 1,
            Self::Medium => 3,
            Self::High => 5,
        }
    }

    pub fn from_value(v: i64) -> Self {
        match v {
            1 => Self::Low,
            5 => Self::High,
            _ => Self::Medium,
        }
    }
}

/// A unit of work assigned to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    /// research, development, community, design, quality, coordination, …
    pub domain: String,
    pub priority: TaskPriority,
    pub assigned_to: Option<AgentId>,
    pub created_by: Option<AgentId>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub requirements: Vec<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, serde_json::Value>,
    pub result: String,
    /// Confidence in the result, 0.0–1.0. Always 0.0 on failure.
    pub confidence: f64,
    pub parent_task_id: Option<TaskId>,
    pub learnings: Vec<String>,
    /// New work discovered while executing; feeds the autonomous layer.
    pub follow_ups: Vec<String>,
}

impl Task {
    pub fn new(title: &str, description: &str, domain: &str) -> Self {
        Self {
            id: TaskId::new(),
            title: title.to_string(),
            description: description.to_string(),
            domain: domain.to_string(),
            priority: TaskPriority::Medium,
            assigned_to: None,
            created_by: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            due_at: None,
            requirements: Vec::new(),
            constraints: BTreeMap::new(),
            result: String::new(),
            confidence: 0.5,
            parent_task_id: None,
            learnings: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    pub fn is_overdue(&self) -> bool {
        match self.due_at {
            Some(due) if self.status != TaskStatus::Completed => Utc::now() > due,
            _ => false,
        }
    }

    /// Seconds spent on the task so far, or None if never started.
    pub fn elapsed_secs(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_seconds())
    }

    pub fn mark_started(&mut self) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: &str, confidence: f64) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = result.to_string();
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.result = error.to_string();
        self.confidence = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_tracks_participants_and_monotonic_timestamp() {
        let conv_id = ConversationId::new();
        let mut conv = Conversation::new(conv_id.clone(), AgentId::new("leader"), "standup");

        let m1 = AgentMessage::new(
            AgentId::new("leader"),
            AgentId::team(),
            MessageType::Broadcast,
            "standup time",
        )
        .in_conversation(conv_id.clone());
        let first_ts = conv.last_message_at;
        conv.push(m1);

        assert!(conv.last_message_at >= first_ts);
        assert_eq!(conv.participants, vec![AgentId::new("leader")]);

        // direct message adds the recipient; broadcast recipients are not listed
        let m2 = AgentMessage::new(
            AgentId::new("coder"),
            AgentId::new("auditor"),
            MessageType::Request,
            "review this",
        )
        .in_conversation(conv_id);
        conv.push(m2);
        assert!(conv.participants.contains(&AgentId::new("coder")));
        assert!(conv.participants.contains(&AgentId::new("auditor")));
    }

    #[test]
    fn failed_task_has_zero_confidence() {
        let mut task = Task::new("t", "d", "development");
        task.mark_started();
        task.mark_failed("boom");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.confidence, 0.0);
        assert!(task.started_at.unwrap() <= task.completed_at.unwrap());
    }

    #[test]
    fn tier_roundtrip_and_thresholds() {
        for tier in RoutingTier::all() {
            let parsed: RoutingTier = tier.to_string().parse().unwrap();
            assert_eq!(parsed, tier);
        }
        assert_eq!(RoutingTier::Coding.default_threshold(), 0.90);
        assert_eq!(RoutingTier::Reasoning.estimated_tokens(), 2000);
    }

    #[test]
    fn priority_value_roundtrip() {
        assert_eq!(TaskPriority::from_value(TaskPriority::High.value()), TaskPriority::High);
        assert_eq!(TaskPriority::from_value(2), TaskPriority::Medium);
    }
}
