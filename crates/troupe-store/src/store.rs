use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

use troupe_core::{
    AgentId, AgentMessage, ConversationId, MessageId, MessageType, Task, TaskId, TaskPriority,
    TaskStatus,
};

use crate::cache::{CacheStats, QueryCache};
use crate::db::init_db;
use crate::error::Result;
use crate::types::{BotTaskStats, DecisionRecord, RecentTask};

/// One cache, heterogeneous values. Keys are namespaced (`msg:`, `task:`,
/// `bot_tasks:`) so a single invalidation pass covers direct and derived
/// entries.
#[derive(Clone)]
enum CachedValue {
    Message(AgentMessage),
    Task(Task),
    BotStats(BotTaskStats),
}

/// Persistent storage for coordinator messages, tasks and decisions.
///
/// Thread-safe: the SQLite connection and the query cache each sit behind
/// their own mutex; no operation holds both at once across a suspension.
pub struct CoordinatorStore {
    conn: Mutex<Connection>,
    cache: Mutex<QueryCache<CachedValue>>,
}

impl CoordinatorStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: Mutex::new(QueryCache::with_defaults()),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().unwrap().stats()
    }

    // --- messages ----------------------------------------------------------

    pub fn save_message(&self, message: &AgentMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let context = if message.context.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.context)?)
        };
        conn.execute(
            "INSERT OR REPLACE INTO coordinator_messages
             (id, sender, recipient, message_type, content, conversation_id,
              context, timestamp, response_to)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            rusqlite::params![
                message.id.as_str(),
                message.sender.as_str(),
                message.recipient.as_str(),
                message.message_type.to_string(),
                message.content,
                message.conversation_id.as_str(),
                context,
                message.timestamp.to_rfc3339(),
                message.response_to.as_ref().map(|id| id.as_str().to_string()),
            ],
        )?;
        drop(conn);

        debug!(message_id = %message.id, "message saved");
        self.cache.lock().unwrap().invalidate(message.id.as_str());
        Ok(())
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Option<AgentMessage>> {
        let key = format!("msg:{id}");
        if let Some(CachedValue::Message(m)) = self.cache.lock().unwrap().get(&key) {
            return Ok(Some(m));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sender, recipient, message_type, content, conversation_id,
                    context, timestamp, response_to
             FROM coordinator_messages WHERE id = ?1",
        )?;
        let message = stmt
            .query_map([id.as_str()], row_to_message)?
            .filter_map(|r| r.ok())
            .next();
        drop(stmt);
        drop(conn);

        if let Some(ref m) = message {
            self.cache
                .lock()
                .unwrap()
                .set(&key, CachedValue::Message(m.clone()));
        }
        Ok(message)
    }

    /// All messages in a conversation, ascending by time.
    pub fn get_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<AgentMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sender, recipient, message_type, content, conversation_id,
                    context, timestamp, response_to
             FROM coordinator_messages
             WHERE conversation_id = ?1
             ORDER BY timestamp ASC
             LIMIT ?2",
        )?;
        let messages = stmt
            .query_map(
                rusqlite::params![conversation_id.as_str(), limit],
                row_to_message,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    /// Substring search over content, newest first, with optional sender and
    /// type filters.
    pub fn search_messages(
        &self,
        query: &str,
        sender: Option<&AgentId>,
        message_type: Option<MessageType>,
        limit: usize,
    ) -> Result<Vec<AgentMessage>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT id, sender, recipient, message_type, content, conversation_id,
                    context, timestamp, response_to
             FROM coordinator_messages
             WHERE content LIKE ?1",
        );
        let like = format!("%{query}%");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(like)];

        if let Some(s) = sender {
            sql.push_str(" AND sender = ?2");
            params.push(Box::new(s.as_str().to_string()));
        }
        if let Some(t) = message_type {
            sql.push_str(&format!(" AND message_type = ?{}", params.len() + 1));
            params.push(Box::new(t.to_string()));
        }
        sql.push_str(&format!(
            " ORDER BY timestamp DESC LIMIT ?{}",
            params.len() + 1
        ));
        params.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let messages = stmt
            .query_map(refs.as_slice(), row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    // --- tasks -------------------------------------------------------------

    pub fn save_task(&self, task: &Task) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO coordinator_tasks
             (id, title, description, domain, priority, assigned_to, created_by,
              status, created_at, started_at, completed_at, due_at,
              requirements, constraints, result, confidence, parent_task_id,
              learnings, follow_ups)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            rusqlite::params![
                task.id.as_str(),
                task.title,
                task.description,
                task.domain,
                task.priority.value(),
                task.assigned_to.as_ref().map(|a| a.as_str().to_string()),
                task.created_by.as_ref().map(|a| a.as_str().to_string()),
                task.status.to_string(),
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.due_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&task.requirements)?,
                serde_json::to_string(&task.constraints)?,
                task.result,
                task.confidence,
                task.parent_task_id.as_ref().map(|t| t.as_str().to_string()),
                serde_json::to_string(&task.learnings)?,
                serde_json::to_string(&task.follow_ups)?,
            ],
        )?;
        drop(conn);

        debug!(task_id = %task.id, status = %task.status, "task saved");

        let mut cache = self.cache.lock().unwrap();
        cache.invalidate(task.id.as_str());
        if let Some(ref bot) = task.assigned_to {
            cache.invalidate(&format!("bot_tasks:{bot}"));
        }
        Ok(())
    }

    pub fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let key = format!("task:{id}");
        if let Some(CachedValue::Task(t)) = self.cache.lock().unwrap().get(&key) {
            return Ok(Some(t));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{TASK_SELECT} WHERE id = ?1"))?;
        let task = stmt
            .query_map([id.as_str()], row_to_task)?
            .filter_map(|r| r.ok())
            .next();
        drop(stmt);
        drop(conn);

        if let Some(ref t) = task {
            self.cache
                .lock()
                .unwrap()
                .set(&key, CachedValue::Task(t.clone()));
        }
        Ok(task)
    }

    pub fn get_tasks_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{TASK_SELECT} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let tasks = stmt
            .query_map(rusqlite::params![status.to_string(), limit], row_to_task)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    pub fn get_tasks_by_bot(&self, bot: &AgentId, limit: usize) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{TASK_SELECT} WHERE assigned_to = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let tasks = stmt
            .query_map(rusqlite::params![bot.as_str(), limit], row_to_task)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    /// Task statistics for a bot: counts, success rate, average confidence
    /// over completions, and the 10 most recent tasks.
    pub fn bot_task_stats(&self, bot: &AgentId) -> Result<BotTaskStats> {
        let key = format!("bot_tasks:{bot}");
        if let Some(CachedValue::BotStats(s)) = self.cache.lock().unwrap().get(&key) {
            return Ok(s);
        }

        let tasks = self.get_tasks_by_bot(bot, 50)?;
        let completed: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .collect();
        let failed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        let in_progress = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .count();

        let avg_confidence = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|t| t.confidence).sum::<f64>() / completed.len() as f64
        };
        let success_rate = if tasks.is_empty() {
            0.0
        } else {
            completed.len() as f64 / tasks.len() as f64
        };

        let stats = BotTaskStats {
            bot_id: bot.as_str().to_string(),
            total_tasks: tasks.len(),
            completed: completed.len(),
            failed,
            in_progress,
            success_rate,
            avg_confidence,
            recent_tasks: tasks
                .iter()
                .take(10)
                .map(|t| RecentTask {
                    id: t.id.clone(),
                    title: t.title.clone(),
                    status: t.status,
                    confidence: t.confidence,
                })
                .collect(),
        };

        self.cache
            .lock()
            .unwrap()
            .set(&key, CachedValue::BotStats(stats.clone()));
        Ok(stats)
    }

    // --- decisions ---------------------------------------------------------

    pub fn save_decision(&self, decision: &DecisionRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO coordinator_decisions
             (id, decision_type, task_id, participants, positions, reasoning,
              final_decision, confidence, dissent, escalated, timestamp)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            rusqlite::params![
                decision.id,
                decision.decision_type,
                decision.task_id.as_ref().map(|t| t.as_str().to_string()),
                serde_json::to_string(&decision.participants)?,
                serde_json::to_string(&decision.positions)?,
                decision.reasoning,
                decision.final_decision,
                decision.confidence,
                decision.dissent,
                decision.escalated as i64,
                decision.timestamp.to_rfc3339(),
            ],
        )?;
        debug!(decision_id = %decision.id, "decision saved");
        Ok(())
    }

    pub fn get_decision(&self, id: &str) -> Result<Option<DecisionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{DECISION_SELECT} WHERE id = ?1"))?;
        let decision = stmt
            .query_map([id], row_to_decision)?
            .filter_map(|r| r.ok())
            .next();
        Ok(decision)
    }

    pub fn get_decisions_for_task(&self, task_id: &TaskId) -> Result<Vec<DecisionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{DECISION_SELECT} WHERE task_id = ?1 ORDER BY timestamp DESC"
        ))?;
        let decisions = stmt
            .query_map([task_id.as_str()], row_to_decision)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(decisions)
    }

    /// Borrow the connection for sibling stores (tool outputs) that share
    /// the same database file.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}

const TASK_SELECT: &str = "SELECT id, title, description, domain, priority, assigned_to,
        created_by, status, created_at, started_at, completed_at, due_at,
        requirements, constraints, result, confidence, parent_task_id,
        learnings, follow_ups
 FROM coordinator_tasks";

const DECISION_SELECT: &str = "SELECT id, decision_type, task_id, participants, positions,
        reasoning, final_decision, confidence, dissent, escalated, timestamp
 FROM coordinator_decisions";

// --- row decoding ----------------------------------------------------------
//
// Corrupt values decode to defaults with a warning; a single bad column
// never fails the whole read.

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn!(raw, "bad timestamp in store row, substituting now");
            Utc::now()
        })
}

fn parse_ts_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(|s| parse_ts(&s))
}

fn parse_json_or_default<T: Default + serde::de::DeserializeOwned>(
    raw: Option<String>,
    what: &str,
) -> T {
    match raw {
        None => T::default(),
        Some(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(column = what, error = %e, "bad JSON in store row, substituting default");
            T::default()
        }),
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentMessage> {
    let type_str: String = row.get(3)?;
    let ts: String = row.get(7)?;
    Ok(AgentMessage {
        id: MessageId(row.get(0)?),
        sender: AgentId(row.get(1)?),
        recipient: AgentId(row.get(2)?),
        message_type: type_str.parse().unwrap_or_else(|_| {
            warn!(raw = %type_str, "bad message type in store row, substituting request");
            MessageType::Request
        }),
        content: row.get(4)?,
        conversation_id: ConversationId(row.get(5)?),
        context: parse_json_or_default(row.get(6)?, "context"),
        timestamp: parse_ts(&ts),
        response_to: row.get::<_, Option<String>>(8)?.map(MessageId),
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status_str: String = row.get(7)?;
    let created: String = row.get(8)?;
    Ok(Task {
        id: TaskId(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        domain: row.get(3)?,
        priority: TaskPriority::from_value(row.get(4)?),
        assigned_to: row.get::<_, Option<String>>(5)?.map(AgentId),
        created_by: row.get::<_, Option<String>>(6)?.map(AgentId),
        status: status_str.parse().unwrap_or_else(|_| {
            warn!(raw = %status_str, "bad task status in store row, substituting pending");
            TaskStatus::Pending
        }),
        created_at: parse_ts(&created),
        started_at: parse_ts_opt(row.get(9)?),
        completed_at: parse_ts_opt(row.get(10)?),
        due_at: parse_ts_opt(row.get(11)?),
        requirements: parse_json_or_default(row.get(12)?, "requirements"),
        constraints: parse_json_or_default(row.get(13)?, "constraints"),
        result: row.get::<_, Option<String>>(14)?.unwrap_or_default(),
        confidence: row.get::<_, Option<f64>>(15)?.unwrap_or(0.5),
        parent_task_id: row.get::<_, Option<String>>(16)?.map(TaskId),
        learnings: parse_json_or_default(row.get(17)?, "learnings"),
        follow_ups: parse_json_or_default(row.get(18)?, "follow_ups"),
    })
}

fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecisionRecord> {
    let ts: String = row.get(10)?;
    Ok(DecisionRecord {
        id: row.get(0)?,
        decision_type: row.get(1)?,
        task_id: row.get::<_, Option<String>>(2)?.map(TaskId),
        participants: parse_json_or_default(row.get(3)?, "participants"),
        positions: parse_json_or_default::<BTreeMap<String, String>>(row.get(4)?, "positions"),
        reasoning: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        final_decision: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        confidence: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
        dissent: row.get(8)?,
        escalated: row.get::<_, i64>(9)? != 0,
        timestamp: parse_ts(&ts),
    })
}
