use rusqlite::Connection;

use crate::error::Result;

/// Initialise the routines schema in `conn` (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS routine_jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            schedule         TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            payload          TEXT    NOT NULL,   -- JSON-encoded JobPayload
            status           TEXT    NOT NULL DEFAULT 'pending',
            last_run         TEXT,               -- RFC 3339 or NULL
            next_run         TEXT,               -- RFC 3339 or NULL
            run_count        INTEGER NOT NULL DEFAULT 0,
            delete_after_run INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        -- The poll loop filters on next_run every second; keep it indexed.
        CREATE INDEX IF NOT EXISTS idx_routine_jobs_next_run
            ON routine_jobs (next_run);
        ",
    )?;
    Ok(())
}
