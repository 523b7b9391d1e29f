use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use troupe_core::{AgentId, RoomId};

/// What kind of room this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    /// Anyone can drop in (e.g. `general`).
    Open,
    /// Scoped to a project.
    Project,
    /// One-on-one.
    Direct,
    /// Team coordination traffic.
    Coordination,
}

impl std::fmt::Display for RoomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Project => "project",
            Self::Direct => "direct",
            Self::Coordination => "coordination",
        };
        write!(f, "{s}")
    }
}

/// An external channel joined to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMember {
    /// Channel kind: "telegram", "discord", "webchat", …
    pub channel: String,
    /// Platform-native chat identifier.
    pub chat_id: String,
    pub joined_at: DateTime<Utc>,
}

impl ChannelMember {
    /// The `<channel>:<chat_id>` key used in the binding index.
    pub fn key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A room: persistent, named, independent of any single chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub room_type: RoomType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bot participants, in join order.
    pub participants: Vec<AgentId>,
    pub channel_members: Vec<ChannelMember>,
    pub description: String,
}

impl Room {
    pub fn new(id: RoomId, name: &str, room_type: RoomType) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            room_type,
            created_at: now,
            updated_at: now,
            participants: Vec::new(),
            channel_members: Vec::new(),
            description: String::new(),
        }
    }

    pub fn add_participant(&mut self, bot: AgentId) {
        if !self.participants.contains(&bot) {
            self.participants.push(bot);
            self.updated_at = Utc::now();
        }
    }

    pub fn remove_participant(&mut self, bot: &AgentId) {
        if let Some(pos) = self.participants.iter().position(|p| p == bot) {
            self.participants.remove(pos);
            self.updated_at = Utc::now();
        }
    }

    pub fn add_channel_member(&mut self, member: ChannelMember) {
        if self.channel_members.iter().any(|m| m.key() == member.key()) {
            return;
        }
        self.channel_members.push(member);
        self.updated_at = Utc::now();
    }

    pub fn remove_channel_member(&mut self, key: &str) {
        let before = self.channel_members.len();
        self.channel_members.retain(|m| m.key() != key);
        if self.channel_members.len() != before {
            self.updated_at = Utc::now();
        }
    }
}
