use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::schedule::compute_next_run;
use crate::types::{Job, JobPayload, JobStatus, Schedule};

/// Drives routine jobs off the SQLite table at one-second granularity.
///
/// Fired jobs are handed to the executor over mpsc with `try_send`; a
/// slow or dead consumer costs a dropped firing, never a stalled poll.
pub struct SchedulerEngine {
    conn: Arc<Mutex<Connection>>,
    fired_tx: Option<mpsc::Sender<Job>>,
}

impl SchedulerEngine {
    pub fn new(conn: Connection, fired_tx: Option<mpsc::Sender<Job>>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fired_tx,
        })
    }

    /// Persist a new job and compute its first firing time.
    pub fn add_job(
        &self,
        name: &str,
        schedule: Schedule,
        payload: JobPayload,
        delete_after_run: bool,
    ) -> Result<Job> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let next = compute_next_run(&schedule, now).map(|dt| dt.to_rfc3339());
        let id = Uuid::new_v4().to_string();

        let schedule_json = serde_json::to_string(&schedule)
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO routine_jobs
             (id, name, schedule, payload, status, last_run, next_run,
              run_count, delete_after_run, created_at, updated_at)
             VALUES (?1,?2,?3,?4,'pending',NULL,?5,0,?6,?7,?7)",
            rusqlite::params![
                id,
                name,
                schedule_json,
                payload_json,
                next,
                delete_after_run as i64,
                now_str
            ],
        )?;

        info!(job_id = %id, %name, "routine scheduled");

        Ok(Job {
            id,
            name: name.to_string(),
            schedule,
            payload,
            status: JobStatus::Pending,
            last_run: None,
            next_run: next,
            run_count: 0,
            delete_after_run,
            created_at: now_str.clone(),
            updated_at: now_str,
        })
    }

    /// Delete a job. `JobNotFound` when the id matches nothing.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM routine_jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "routine unscheduled");
        Ok(())
    }

    /// Every job on the books, oldest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, schedule, payload, status, last_run, next_run,
                    run_count, delete_after_run, created_at, updated_at
             FROM routine_jobs ORDER BY created_at",
        )?;

        let jobs = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, u32>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })?
            .filter_map(|r| {
                let (
                    id,
                    name,
                    sched_json,
                    payload_json,
                    status_str,
                    last_run,
                    next_run,
                    run_count,
                    delete_after_run,
                    created_at,
                    updated_at,
                ) = r.ok()?;
                let schedule: Schedule = serde_json::from_str(&sched_json).ok()?;
                let payload: JobPayload = serde_json::from_str(&payload_json).ok()?;
                let status: JobStatus = status_str.parse().ok()?;
                Some(Job {
                    id,
                    name,
                    schedule,
                    payload,
                    status,
                    last_run,
                    next_run,
                    run_count,
                    delete_after_run: delete_after_run != 0,
                    created_at,
                    updated_at,
                })
            })
            .collect();

        Ok(jobs)
    }

    /// Poll loop: one [`Self::tick`] per second until `shutdown` flips to
    /// `true`. Jobs that came due while the process was down are flagged
    /// missed first, not back-filled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("routine scheduler online");
        self.mark_missed_on_startup();

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("routine poll failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("routine scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// A pending job whose firing time predates this boot never fired;
    /// flag it missed rather than firing it late.
    fn mark_missed_on_startup(&self) {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        match conn.execute(
            "UPDATE routine_jobs SET status = 'missed', updated_at = ?1
             WHERE status = 'pending' AND next_run IS NOT NULL AND next_run < ?1",
            [&now],
        ) {
            Ok(n) if n > 0 => warn!(count = n, "flagged routines whose window passed while offline"),
            Err(e) => error!("could not flag offline-window routines: {e}"),
            _ => {}
        }
    }

    /// Fire everything whose `next_run` is in the past.
    pub fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        // Two passes over the connection: read the due rows into plain
        // tuples here, write back per job afterwards. Keeps each lock
        // acquisition short and the SELECT statement out of the way of
        // the UPDATEs.
        let due: Vec<(String, String, String, String, u32, bool)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare_cached(
                "SELECT id, name, schedule, payload, run_count, delete_after_run
                 FROM routine_jobs
                 WHERE status = 'pending' AND next_run IS NOT NULL AND next_run <= ?1",
            )?;
            let rows: Vec<_> = stmt
                .query_map([&now_str], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, i64>(5)? != 0,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        for (id, name, sched_json, payload_json, run_count, delete_after_run) in due {
            let schedule: Schedule = match serde_json::from_str(&sched_json) {
                Ok(s) => s,
                Err(e) => {
                    error!(job_id = %id, "bad schedule JSON: {e}");
                    continue;
                }
            };
            let payload: JobPayload = serde_json::from_str(&payload_json).unwrap_or_default();

            let new_count = run_count + 1;
            let next = compute_next_run(&schedule, now).map(|dt| dt.to_rfc3339());

            info!(job_id = %id, %name, run = new_count, "routine due, firing");

            let conn = self.conn.lock().unwrap();
            if delete_after_run || next.is_none() {
                if delete_after_run {
                    // one-shot jobs auto-delete after firing
                    conn.execute("DELETE FROM routine_jobs WHERE id = ?1", [&id])?;
                } else {
                    conn.execute(
                        "UPDATE routine_jobs SET status='completed', last_run=?1,
                          next_run=NULL, run_count=?2, updated_at=?1
                         WHERE id=?3",
                        rusqlite::params![now_str, new_count, id],
                    )?;
                }
            } else {
                conn.execute(
                    "UPDATE routine_jobs SET status='pending', last_run=?1, next_run=?2,
                      run_count=?3, updated_at=?1
                     WHERE id=?4",
                    rusqlite::params![now_str, next, new_count, id],
                )?;
            }
            drop(conn);

            if let Some(ref tx) = self.fired_tx {
                let job = Job {
                    id: id.clone(),
                    name,
                    schedule,
                    payload,
                    status: JobStatus::Running,
                    last_run: Some(now_str.clone()),
                    next_run: next,
                    run_count: new_count,
                    delete_after_run,
                    created_at: String::new(),
                    updated_at: now_str.clone(),
                };
                if tx.try_send(job).is_err() {
                    warn!(job_id = %id, "executor queue unavailable, this firing is lost");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(tx: Option<mpsc::Sender<Job>>) -> Arc<SchedulerEngine> {
        Arc::new(SchedulerEngine::new(Connection::open_in_memory().unwrap(), tx).unwrap())
    }

    #[test]
    fn add_list_remove_roundtrip() {
        let engine = engine(None);
        let job = engine
            .add_job(
                "daily calibration",
                Schedule::Cron {
                    expr: "0 2 * * *".to_string(),
                    tz: "UTC".to_string(),
                },
                JobPayload {
                    message: "CALIBRATE_ROUTING".to_string(),
                    routine: Some("calibration".to_string()),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert!(job.next_run.is_some());
        assert!(job.is_calibration());

        let jobs = engine.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);

        engine.remove_job(&job.id).unwrap();
        assert!(engine.list_jobs().unwrap().is_empty());
        assert!(matches!(
            engine.remove_job(&job.id),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn due_interval_job_fires_and_reschedules() {
        let (tx, mut rx) = mpsc::channel(8);
        let engine = engine(Some(tx));

        // every_ms of 1 means the job is due on the very next tick
        engine
            .add_job(
                "fast",
                Schedule::Every { every_ms: 1 },
                JobPayload {
                    message: "ping".to_string(),
                    ..Default::default()
                },
                false,
            )
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        engine.tick().unwrap();

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload.message, "ping");
        assert_eq!(fired.run_count, 1);

        // still present, rescheduled
        let jobs = engine.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert!(jobs[0].next_run.is_some());
    }

    #[tokio::test]
    async fn one_shot_job_auto_deletes_after_firing() {
        let (tx, mut rx) = mpsc::channel(8);
        let engine = engine(Some(tx));

        let soon = Utc::now() + chrono::Duration::milliseconds(5);
        engine
            .add_job(
                "remind me",
                Schedule::At {
                    at_ms: soon.timestamp_millis(),
                },
                JobPayload {
                    message: "stand up!".to_string(),
                    deliver: true,
                    channel: Some("telegram".to_string()),
                    to: Some("chat-9".to_string()),
                    ..Default::default()
                },
                true,
            )
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.tick().unwrap();

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload.message, "stand up!");
        assert!(engine.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn stale_pending_jobs_marked_missed_on_startup() {
        let conn = Connection::open_in_memory().unwrap();
        let engine = Arc::new(SchedulerEngine::new(conn, None).unwrap());
        // insert a job whose next_run is already in the past
        {
            let conn = engine.conn.lock().unwrap();
            let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO routine_jobs
                 (id, name, schedule, payload, status, next_run, created_at, updated_at)
                 VALUES ('j1','stale','{\"kind\":\"every\",\"every_ms\":60000}','{\"message\":\"x\"}','pending',?1,?2,?2)",
                rusqlite::params![past, now],
            )
            .unwrap();
        }
        engine.mark_missed_on_startup();
        let jobs = engine.list_jobs().unwrap();
        assert_eq!(jobs[0].status, JobStatus::Missed);
    }
}
