use rusqlite::Connection;

use crate::error::Result;

/// Initialise the coordination schema in `conn`. Safe to call on every
/// startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_messages_table(conn)?;
    create_tasks_table(conn)?;
    create_decisions_table(conn)?;
    create_tool_outputs_table(conn)?;
    Ok(())
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS coordinator_messages (
            id              TEXT NOT NULL PRIMARY KEY,
            sender          TEXT NOT NULL,
            recipient       TEXT NOT NULL,
            message_type    TEXT NOT NULL,
            content         TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            context         TEXT,               -- JSON object
            timestamp       TEXT NOT NULL,      -- RFC 3339
            response_to     TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON coordinator_messages(conversation_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON coordinator_messages(sender, timestamp DESC);",
    )?;
    Ok(())
}

fn create_tasks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS coordinator_tasks (
            id             TEXT    NOT NULL PRIMARY KEY,
            title          TEXT    NOT NULL,
            description    TEXT    NOT NULL,
            domain         TEXT    NOT NULL,
            priority       INTEGER NOT NULL DEFAULT 3,
            assigned_to    TEXT,
            created_by     TEXT,
            status         TEXT    NOT NULL DEFAULT 'pending',
            created_at     TEXT    NOT NULL,
            started_at     TEXT,
            completed_at   TEXT,
            due_at         TEXT,
            requirements   TEXT,                -- JSON array
            constraints    TEXT,                -- JSON object
            result         TEXT    NOT NULL DEFAULT '',
            confidence     REAL    NOT NULL DEFAULT 0.5,
            parent_task_id TEXT,
            learnings      TEXT,                -- JSON array
            follow_ups     TEXT                 -- JSON array
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_status
            ON coordinator_tasks(status, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_tasks_assignee
            ON coordinator_tasks(assigned_to, created_at DESC);",
    )?;
    Ok(())
}

fn create_decisions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS coordinator_decisions (
            id             TEXT    NOT NULL PRIMARY KEY,
            decision_type  TEXT    NOT NULL,
            task_id        TEXT,
            participants   TEXT,                -- JSON array of agent ids
            positions      TEXT,                -- JSON object agent -> position
            reasoning      TEXT    NOT NULL DEFAULT '',
            final_decision TEXT    NOT NULL DEFAULT '',
            confidence     REAL    NOT NULL DEFAULT 0,
            dissent        TEXT,
            escalated      INTEGER NOT NULL DEFAULT 0,
            timestamp      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_decisions_task
            ON coordinator_decisions(task_id, timestamp DESC);",
    )?;
    Ok(())
}

fn create_tool_outputs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tool_outputs (
            id              TEXT    NOT NULL PRIMARY KEY,
            tool_name       TEXT    NOT NULL,
            full_output     TEXT    NOT NULL,
            context_summary TEXT,
            created_at      TEXT    NOT NULL,
            session_key     TEXT,
            accessed_count  INTEGER NOT NULL DEFAULT 0,
            char_count      INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tool_outputs_session
            ON tool_outputs(session_key);
        CREATE INDEX IF NOT EXISTS idx_tool_outputs_created
            ON tool_outputs(created_at);",
    )?;
    Ok(())
}
