use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use troupe_core::{
    AgentId, AgentMessage, Conversation, ConversationId, MessageId, MessageType,
};

use crate::types::{BusStats, RegisteredAgent};

/// Global log bound; the oldest message drops on overflow.
const DEFAULT_MAX_HISTORY: usize = 1000;

struct Inner {
    max_history: usize,
    messages: VecDeque<AgentMessage>,
    conversations: HashMap<ConversationId, Conversation>,
    inboxes: HashMap<AgentId, VecDeque<AgentMessage>>,
    agents: Vec<RegisteredAgent>,
}

impl Inner {
    fn agent_mut(&mut self, id: &AgentId) -> Option<&mut RegisteredAgent> {
        self.agents.iter_mut().find(|a| &a.id == id)
    }

    fn is_registered(&self, id: &AgentId) -> bool {
        self.agents.iter().any(|a| &a.id == id)
    }
}

/// Central message bus for agent-to-agent communication.
pub struct AgentBus {
    inner: Mutex<Inner>,
}

impl Default for AgentBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl AgentBus {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                max_history,
                messages: VecDeque::new(),
                conversations: HashMap::new(),
                inboxes: HashMap::new(),
                agents: Vec::new(),
            }),
        }
    }

    /// Register an agent. Re-registering an id updates its name/domain and
    /// keeps its counters.
    pub fn register_agent(&self, id: AgentId, name: &str, domain: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.agent_mut(&id) {
            existing.name = name.to_string();
            existing.domain = domain.to_string();
            return;
        }
        info!(agent = %id, name, domain, "agent registered on bus");
        inner.agents.push(RegisteredAgent {
            id: id.clone(),
            name: name.to_string(),
            domain: domain.to_string(),
            registered_at: Utc::now(),
            messages_sent: 0,
        });
        inner.inboxes.entry(id).or_default();
    }

    /// Registered agents in registration order.
    pub fn list_agents(&self) -> Vec<RegisteredAgent> {
        self.inner.lock().unwrap().agents.clone()
    }

    /// Publish a message: append to the log and its conversation, then
    /// deliver. `team` fans out to every registered agent except the
    /// sender; anything else goes to that one inbox. Unregistered senders
    /// are warned about but not blocked.
    pub fn publish(&self, message: AgentMessage) -> MessageId {
        let mut inner = self.inner.lock().unwrap();

        if !inner.is_registered(&message.sender) {
            warn!(sender = %message.sender, "unregistered agent published a message");
        }

        let id = message.id.clone();

        // global log, bounded
        inner.messages.push_back(message.clone());
        if inner.messages.len() > inner.max_history {
            inner.messages.pop_front();
        }

        // conversation threading (created on first sight)
        let conv = inner
            .conversations
            .entry(message.conversation_id.clone())
            .or_insert_with(|| {
                Conversation::new(
                    message.conversation_id.clone(),
                    message.sender.clone(),
                    message.subject().unwrap_or_default(),
                )
            });
        conv.push(message.clone());

        // delivery
        if message.recipient.is_team() {
            let recipients: Vec<AgentId> = inner
                .agents
                .iter()
                .map(|a| a.id.clone())
                .filter(|id| id != &message.sender)
                .collect();
            let count = recipients.len();
            for recipient in recipients {
                inner
                    .inboxes
                    .entry(recipient)
                    .or_default()
                    .push_back(message.clone());
            }
            info!(
                sender = %message.sender,
                recipients = count,
                "broadcast delivered"
            );
        } else {
            inner
                .inboxes
                .entry(message.recipient.clone())
                .or_default()
                .push_back(message.clone());
            info!(
                sender = %message.sender,
                recipient = %message.recipient,
                "message delivered"
            );
        }

        if let Some(agent) = inner.agent_mut(&message.sender) {
            agent.messages_sent += 1;
        }

        id
    }

    /// Messages waiting for an agent, in delivery order.
    pub fn inbox(&self, agent: &AgentId) -> Vec<AgentMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .inboxes
            .get(agent)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Clear an agent's inbox; returns how many messages were dropped.
    pub fn clear_inbox(&self, agent: &AgentId) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner
            .inboxes
            .get_mut(agent)
            .map(|q| {
                let n = q.len();
                q.clear();
                n
            })
            .unwrap_or(0)
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.inner.lock().unwrap().conversations.get(id).cloned()
    }

    /// Conversations an agent participates in, most recently active first.
    pub fn conversations_for(&self, agent: &AgentId, limit: usize) -> Vec<Conversation> {
        let inner = self.inner.lock().unwrap();
        let mut convs: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.participants.contains(agent) || &c.initiated_by == agent)
            .cloned()
            .collect();
        convs.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        convs.truncate(limit);
        convs
    }

    /// Substring search over the retained log, newest first.
    pub fn search(
        &self,
        query: &str,
        sender: Option<&AgentId>,
        message_type: Option<MessageType>,
        limit: usize,
    ) -> Vec<AgentMessage> {
        let inner = self.inner.lock().unwrap();
        let needle = query.to_lowercase();
        let mut results = Vec::new();

        for msg in inner.messages.iter().rev() {
            if let Some(s) = sender {
                if &msg.sender != s {
                    continue;
                }
            }
            if let Some(t) = message_type {
                if msg.message_type != t {
                    continue;
                }
            }
            if msg.content.to_lowercase().contains(&needle) {
                results.push(msg.clone());
                if results.len() >= limit {
                    break;
                }
            }
        }
        results
    }

    /// Human-readable summary of a conversation's last 10 messages.
    pub fn conversation_summary(&self, id: &ConversationId) -> String {
        let inner = self.inner.lock().unwrap();
        let Some(conv) = inner.conversations.get(id) else {
            return format!("Conversation {id} not found");
        };

        let participants: Vec<&str> = conv.participants.iter().map(|p| p.as_str()).collect();
        let mut lines = vec![
            format!("=== {} ===", conv.subject),
            format!("Initiated by: {}", conv.initiated_by),
            format!("Participants: {}", participants.join(", ")),
            format!("Messages: {}", conv.messages.len()),
            String::new(),
        ];

        let tail_start = conv.messages.len().saturating_sub(10);
        for msg in &conv.messages[tail_start..] {
            let sender: String = msg.sender.as_str().chars().take(10).collect();
            let content: String = msg.content.chars().take(60).collect();
            lines.push(format!(
                "[{}] {} ({}): {}...",
                msg.timestamp.format("%H:%M:%S"),
                sender,
                msg.message_type,
                content
            ));
        }
        lines.join("\n")
    }

    pub fn stats(&self) -> BusStats {
        let inner = self.inner.lock().unwrap();

        let mut message_types: BTreeMap<String, usize> = BTreeMap::new();
        for msg in &inner.messages {
            *message_types
                .entry(msg.message_type.to_string())
                .or_default() += 1;
        }

        BusStats {
            total_messages: inner.messages.len(),
            total_conversations: inner.conversations.len(),
            registered_agents: inner.agents.len(),
            pending_inbox_messages: inner.inboxes.values().map(|q| q.len()).sum(),
            message_types,
            agent_message_counts: inner
                .agents
                .iter()
                .map(|a| (a.id.as_str().to_string(), a.messages_sent))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_team(names: &[&str]) -> AgentBus {
        let bus = AgentBus::default();
        for name in names {
            bus.register_agent(AgentId::new(name), name, "general");
        }
        bus
    }

    #[test]
    fn broadcast_reaches_everyone_but_sender() {
        let bus = bus_with_team(&["b1", "b2", "b3", "b4", "b5"]);

        let msg = AgentMessage::new(
            AgentId::new("b2"),
            AgentId::team(),
            MessageType::Broadcast,
            "standup",
        );
        let conv_id = msg.conversation_id.clone();
        bus.publish(msg);

        for name in ["b1", "b3", "b4", "b5"] {
            let inbox = bus.inbox(&AgentId::new(name));
            assert_eq!(inbox.len(), 1, "{name} should have exactly one message");
            assert_eq!(inbox[0].content, "standup");
        }
        assert!(bus.inbox(&AgentId::new("b2")).is_empty());

        // after everyone has sent or been addressed the participants set
        // covers the full team
        for name in ["b1", "b3", "b4", "b5"] {
            let reply = AgentMessage::new(
                AgentId::new(name),
                AgentId::new("b2"),
                MessageType::Response,
                "here",
            )
            .in_conversation(conv_id.clone());
            bus.publish(reply);
        }
        let conv = bus.conversation(&conv_id).unwrap();
        let mut participants: Vec<&str> =
            conv.participants.iter().map(|p| p.as_str()).collect();
        participants.sort_unstable();
        assert_eq!(participants, vec!["b1", "b2", "b3", "b4", "b5"]);
    }

    #[test]
    fn direct_message_goes_to_one_inbox_only() {
        let bus = bus_with_team(&["a", "b", "c"]);
        bus.publish(AgentMessage::new(
            AgentId::new("a"),
            AgentId::new("b"),
            MessageType::Request,
            "help me",
        ));
        assert_eq!(bus.inbox(&AgentId::new("b")).len(), 1);
        assert!(bus.inbox(&AgentId::new("a")).is_empty());
        assert!(bus.inbox(&AgentId::new("c")).is_empty());
    }

    #[test]
    fn history_bound_drops_oldest() {
        let bus = AgentBus::new(3);
        bus.register_agent(AgentId::new("a"), "a", "general");
        bus.register_agent(AgentId::new("b"), "b", "general");
        for i in 0..5 {
            bus.publish(AgentMessage::new(
                AgentId::new("a"),
                AgentId::new("b"),
                MessageType::Discussion,
                &format!("msg {i}"),
            ));
        }
        let stats = bus.stats();
        assert_eq!(stats.total_messages, 3);
        // the oldest two are gone from search
        assert!(bus.search("msg 0", None, None, 10).is_empty());
        assert_eq!(bus.search("msg 4", None, None, 10).len(), 1);
    }

    #[test]
    fn conversation_appears_once_per_message() {
        let bus = bus_with_team(&["a", "b"]);
        let msg = AgentMessage::new(
            AgentId::new("a"),
            AgentId::new("b"),
            MessageType::Request,
            "one",
        );
        let msg_id = msg.id.clone();
        let conv_id = msg.conversation_id.clone();
        bus.publish(msg);

        let conv = bus.conversation(&conv_id).unwrap();
        assert_eq!(
            conv.messages.iter().filter(|m| m.id == msg_id).count(),
            1
        );
    }

    #[test]
    fn search_respects_filters_and_limit() {
        let bus = bus_with_team(&["a", "b"]);
        for i in 0..4 {
            bus.publish(AgentMessage::new(
                AgentId::new("a"),
                AgentId::new("b"),
                MessageType::Report,
                &format!("report {i}"),
            ));
        }
        bus.publish(AgentMessage::new(
            AgentId::new("b"),
            AgentId::new("a"),
            MessageType::Discussion,
            "report reply",
        ));

        let hits = bus.search("report", Some(&AgentId::new("a")), None, 2);
        assert_eq!(hits.len(), 2);
        let hits = bus.search("report", None, Some(MessageType::Discussion), 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn conversations_sorted_by_recency() {
        let bus = bus_with_team(&["a", "b"]);
        let m1 = AgentMessage::new(
            AgentId::new("a"),
            AgentId::new("b"),
            MessageType::Discussion,
            "first thread",
        )
        .with_context("subject", serde_json::json!("old"));
        let c1 = m1.conversation_id.clone();
        bus.publish(m1);

        let mut m2 = AgentMessage::new(
            AgentId::new("a"),
            AgentId::new("b"),
            MessageType::Discussion,
            "second thread",
        )
        .with_context("subject", serde_json::json!("new"));
        m2.timestamp = Utc::now() + chrono::Duration::seconds(5);
        let c2 = m2.conversation_id.clone();
        bus.publish(m2);

        let convs = bus.conversations_for(&AgentId::new("a"), 10);
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].id, c2);
        assert_eq!(convs[1].id, c1);
    }

    #[test]
    fn clear_inbox_reports_count() {
        let bus = bus_with_team(&["a", "b"]);
        for _ in 0..3 {
            bus.publish(AgentMessage::new(
                AgentId::new("a"),
                AgentId::new("b"),
                MessageType::Request,
                "ping",
            ));
        }
        assert_eq!(bus.clear_inbox(&AgentId::new("b")), 3);
        assert!(bus.inbox(&AgentId::new("b")).is_empty());
    }

    #[test]
    fn summary_contains_subject_and_tail() {
        let bus = bus_with_team(&["a", "b"]);
        let msg = AgentMessage::new(
            AgentId::new("a"),
            AgentId::new("b"),
            MessageType::Discussion,
            "the plan",
        )
        .with_context("subject", serde_json::json!("planning"));
        let conv_id = msg.conversation_id.clone();
        bus.publish(msg);

        let summary = bus.conversation_summary(&conv_id);
        assert!(summary.contains("=== planning ==="));
        assert!(summary.contains("the plan"));
    }
}
