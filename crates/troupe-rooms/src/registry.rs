use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use troupe_core::{AgentId, RoomId};

use crate::error::{Result, RoomError};
use crate::types::{ChannelMember, Room, RoomType};

const MAPPINGS_FILE: &str = "channel_mappings.json";

/// Default participants seeded into the `general` room.
const DEFAULT_TEAM: [&str; 6] = [
    "leader",
    "researcher",
    "creative",
    "coder",
    "social",
    "auditor",
];

struct Inner {
    /// `<channel>:<chat_id>` -> room id. Reverse index of the per-room
    /// channel member lists; each pair maps to at most one room.
    mappings: HashMap<String, String>,
    /// Rooms loaded from disk this process.
    cache: HashMap<String, Room>,
}

/// Registry of rooms, persisted as one JSON file per room plus a single
/// channel-binding index.
pub struct RoomRegistry {
    rooms_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl RoomRegistry {
    /// Open (or create) a registry rooted at `rooms_dir` and ensure the
    /// default `general` room exists.
    pub fn open(rooms_dir: impl AsRef<Path>) -> Result<Self> {
        let rooms_dir = rooms_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&rooms_dir)?;

        let mappings = load_mappings(&rooms_dir);
        let registry = Self {
            rooms_dir,
            inner: Mutex::new(Inner {
                mappings,
                cache: HashMap::new(),
            }),
        };
        registry.ensure_default_rooms()?;
        Ok(registry)
    }

    /// Create a new room. Rejects duplicates.
    pub fn create_room(
        &self,
        id: &RoomId,
        name: Option<&str>,
        room_type: RoomType,
        participants: &[AgentId],
        description: &str,
    ) -> Result<Room> {
        if self.get_room(id).is_some() {
            return Err(RoomError::DuplicateRoom {
                id: id.as_str().to_string(),
            });
        }

        let mut room = Room::new(id.clone(), name.unwrap_or(id.as_str()), room_type);
        room.description = description.to_string();
        if participants.is_empty() {
            room.participants.push(AgentId::new("leader"));
        } else {
            room.participants = participants.to_vec();
        }

        self.save_room(&room)?;
        self.inner
            .lock()
            .unwrap()
            .cache
            .insert(id.as_str().to_string(), room.clone());

        info!(room = %id, kind = %room.room_type, "room created");
        Ok(room)
    }

    /// Fetch a room by id, loading from disk on cache miss.
    pub fn get_room(&self, id: &RoomId) -> Option<Room> {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(room) = inner.cache.get(id.as_str()) {
                return Some(room.clone());
            }
        }

        let path = self.room_path(id.as_str());
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path)
            .map_err(RoomError::from)
            .and_then(|raw| serde_json::from_str::<Room>(&raw).map_err(RoomError::from))
        {
            Ok(room) => {
                self.inner
                    .lock()
                    .unwrap()
                    .cache
                    .insert(id.as_str().to_string(), room.clone());
                Some(room)
            }
            Err(e) => {
                warn!(room = %id, error = %e, "failed to load room file");
                None
            }
        }
    }

    pub fn get_or_create_room(&self, id: &RoomId, room_type: RoomType) -> Result<Room> {
        if let Some(room) = self.get_room(id) {
            return Ok(room);
        }
        self.create_room(id, None, room_type, &[], "")
    }

    /// Delete a room: removes its file and every channel mapping pointing
    /// at it. Returns false if the room did not exist.
    pub fn delete_room(&self, id: &RoomId) -> Result<bool> {
        let path = self.room_path(id.as_str());
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;

        let mut inner = self.inner.lock().unwrap();
        inner.cache.remove(id.as_str());
        inner
            .mappings
            .retain(|_, room_id| room_id != id.as_str());
        save_mappings(&self.rooms_dir, &inner.mappings)?;

        info!(room = %id, "room deleted");
        Ok(true)
    }

    /// All rooms on disk.
    pub fn list_rooms(&self) -> Vec<Room> {
        let Ok(entries) = std::fs::read_dir(&self.rooms_dir) else {
            return Vec::new();
        };
        let mut rooms = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") || name == MAPPINGS_FILE {
                continue;
            }
            let id = RoomId::new(name.trim_end_matches(".json"));
            if let Some(room) = self.get_room(&id) {
                rooms.push(room);
            }
        }
        rooms.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        rooms
    }

    pub fn add_participant(&self, id: &RoomId, bot: AgentId) -> Result<()> {
        let mut room = self.get_room(id).ok_or_else(|| RoomError::RoomNotFound {
            id: id.as_str().to_string(),
        })?;
        room.add_participant(bot);
        self.save_room(&room)?;
        self.inner
            .lock()
            .unwrap()
            .cache
            .insert(id.as_str().to_string(), room);
        Ok(())
    }

    pub fn remove_participant(&self, id: &RoomId, bot: &AgentId) -> Result<()> {
        let mut room = self.get_room(id).ok_or_else(|| RoomError::RoomNotFound {
            id: id.as_str().to_string(),
        })?;
        room.remove_participant(bot);
        self.save_room(&room)?;
        self.inner
            .lock()
            .unwrap()
            .cache
            .insert(id.as_str().to_string(), room);
        Ok(())
    }

    /// Bind a `(channel, chat_id)` pair to a room. Idempotent: binding the
    /// same pair to the same room twice is a no-op. A pair already bound
    /// elsewhere is moved so the at-most-one-room invariant holds.
    pub fn bind_channel(&self, channel: &str, chat_id: &str, room_id: &RoomId) -> Result<()> {
        let Some(mut room) = self.get_room(room_id) else {
            return Err(RoomError::RoomNotFound {
                id: room_id.as_str().to_string(),
            });
        };

        let key = format!("{channel}:{chat_id}");

        let previous = {
            let inner = self.inner.lock().unwrap();
            inner.mappings.get(&key).cloned()
        };
        match previous.as_deref() {
            Some(existing) if existing == room_id.as_str() => return Ok(()),
            Some(existing) => {
                let old_id = RoomId::new(existing);
                if let Some(mut old_room) = self.get_room(&old_id) {
                    old_room.remove_channel_member(&key);
                    self.save_room(&old_room)?;
                    self.inner
                        .lock()
                        .unwrap()
                        .cache
                        .insert(old_id.as_str().to_string(), old_room);
                }
            }
            None => {}
        }

        room.add_channel_member(ChannelMember {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            joined_at: Utc::now(),
        });
        self.save_room(&room)?;

        let mut inner = self.inner.lock().unwrap();
        inner
            .mappings
            .insert(key.clone(), room_id.as_str().to_string());
        save_mappings(&self.rooms_dir, &inner.mappings)?;
        inner.cache.insert(room_id.as_str().to_string(), room);

        info!(%key, room = %room_id, "channel bound to room");
        Ok(())
    }

    /// Remove a channel binding. Returns false (no side effects) when the
    /// pair was not bound.
    pub fn unbind_channel(&self, channel: &str, chat_id: &str) -> Result<bool> {
        let key = format!("{channel}:{chat_id}");

        let room_id = {
            let inner = self.inner.lock().unwrap();
            inner.mappings.get(&key).cloned()
        };
        let Some(room_id) = room_id else {
            return Ok(false);
        };

        let id = RoomId::new(&room_id);
        if let Some(mut room) = self.get_room(&id) {
            room.remove_channel_member(&key);
            self.save_room(&room)?;
            self.inner
                .lock()
                .unwrap()
                .cache
                .insert(id.as_str().to_string(), room);
        }

        let mut inner = self.inner.lock().unwrap();
        inner.mappings.remove(&key);
        save_mappings(&self.rooms_dir, &inner.mappings)?;

        info!(%key, "channel unbound");
        Ok(true)
    }

    /// Room id for a channel pair, if bound.
    pub fn room_for_channel(&self, channel: &str, chat_id: &str) -> Option<RoomId> {
        let key = format!("{channel}:{chat_id}");
        self.inner
            .lock()
            .unwrap()
            .mappings
            .get(&key)
            .map(|id| RoomId::new(id))
    }

    fn ensure_default_rooms(&self) -> Result<()> {
        let general = RoomId::new("general");
        if self.get_room(&general).is_none() {
            let team: Vec<AgentId> = DEFAULT_TEAM.iter().map(|n| AgentId::new(n)).collect();
            self.create_room(
                &general,
                Some("General"),
                RoomType::Open,
                &team,
                "General conversation room",
            )?;
            info!("created default 'general' room");
        }
        Ok(())
    }

    fn room_path(&self, id: &str) -> PathBuf {
        self.rooms_dir.join(format!("{id}.json"))
    }

    fn save_room(&self, room: &Room) -> Result<()> {
        let path = self.room_path(room.id.as_str());
        let raw = serde_json::to_string_pretty(room)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

fn load_mappings(rooms_dir: &Path) -> HashMap<String, String> {
    let path = rooms_dir.join(MAPPINGS_FILE);
    if !path.exists() {
        return HashMap::new();
    }
    match std::fs::read_to_string(&path)
        .map_err(RoomError::from)
        .and_then(|raw| serde_json::from_str(&raw).map_err(RoomError::from))
    {
        Ok(mappings) => mappings,
        Err(e) => {
            warn!(error = %e, "failed to load channel mappings");
            HashMap::new()
        }
    }
}

fn save_mappings(rooms_dir: &Path, mappings: &HashMap<String, String>) -> Result<()> {
    let path = rooms_dir.join(MAPPINGS_FILE);
    std::fs::write(path, serde_json::to_string_pretty(mappings)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, RoomRegistry) {
        let dir = TempDir::new().unwrap();
        let reg = RoomRegistry::open(dir.path()).unwrap();
        (dir, reg)
    }

    #[test]
    fn general_room_exists_on_startup() {
        let (_dir, reg) = registry();
        let general = reg.get_room(&RoomId::new("general")).unwrap();
        assert_eq!(general.room_type, RoomType::Open);
        assert_eq!(general.participants.len(), 6);
        assert!(general.participants.contains(&AgentId::new("auditor")));
    }

    #[test]
    fn create_rejects_duplicates() {
        let (_dir, reg) = registry();
        let id = RoomId::new("project-website");
        reg.create_room(&id, None, RoomType::Project, &[], "").unwrap();
        let err = reg
            .create_room(&id, None, RoomType::Project, &[], "")
            .unwrap_err();
        assert!(matches!(err, RoomError::DuplicateRoom { .. }));
    }

    #[test]
    fn rooms_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let reg = RoomRegistry::open(dir.path()).unwrap();
            reg.create_room(
                &RoomId::new("dev"),
                Some("Dev"),
                RoomType::Project,
                &[AgentId::new("coder")],
                "dev chatter",
            )
            .unwrap();
            reg.bind_channel("telegram", "12345", &RoomId::new("dev"))
                .unwrap();
        }
        let reg = RoomRegistry::open(dir.path()).unwrap();
        let room = reg.get_room(&RoomId::new("dev")).unwrap();
        assert_eq!(room.name, "Dev");
        assert_eq!(
            reg.room_for_channel("telegram", "12345"),
            Some(RoomId::new("dev"))
        );
    }

    #[test]
    fn bind_is_idempotent_and_unbind_reports_missing() {
        let (_dir, reg) = registry();
        let general = RoomId::new("general");

        reg.bind_channel("discord", "c1", &general).unwrap();
        reg.bind_channel("discord", "c1", &general).unwrap(); // no-op

        let room = reg.get_room(&general).unwrap();
        assert_eq!(room.channel_members.len(), 1);

        assert!(reg.unbind_channel("discord", "c1").unwrap());
        assert!(!reg.unbind_channel("discord", "c1").unwrap());
        assert!(reg.room_for_channel("discord", "c1").is_none());
    }

    #[test]
    fn rebinding_moves_the_pair() {
        let (_dir, reg) = registry();
        let a = RoomId::new("room-a");
        let b = RoomId::new("room-b");
        reg.create_room(&a, None, RoomType::Project, &[], "").unwrap();
        reg.create_room(&b, None, RoomType::Project, &[], "").unwrap();

        reg.bind_channel("telegram", "55", &a).unwrap();
        reg.bind_channel("telegram", "55", &b).unwrap();

        assert_eq!(reg.room_for_channel("telegram", "55"), Some(b.clone()));
        assert!(reg.get_room(&a).unwrap().channel_members.is_empty());
        assert_eq!(reg.get_room(&b).unwrap().channel_members.len(), 1);
    }

    #[test]
    fn delete_removes_file_and_mappings() {
        let (dir, reg) = registry();
        let id = RoomId::new("doomed");
        reg.create_room(&id, None, RoomType::Open, &[], "").unwrap();
        reg.bind_channel("telegram", "9", &id).unwrap();

        assert!(reg.delete_room(&id).unwrap());
        assert!(!dir.path().join("doomed.json").exists());
        assert!(reg.room_for_channel("telegram", "9").is_none());
        assert!(!reg.delete_room(&id).unwrap());
    }

    #[test]
    fn participants_add_remove() {
        let (_dir, reg) = registry();
        let id = RoomId::new("general");
        reg.add_participant(&id, AgentId::new("newbot")).unwrap();
        assert!(reg
            .get_room(&id)
            .unwrap()
            .participants
            .contains(&AgentId::new("newbot")));
        reg.remove_participant(&id, &AgentId::new("newbot")).unwrap();
        assert!(!reg
            .get_room(&id)
            .unwrap()
            .participants
            .contains(&AgentId::new("newbot")));
    }
}
