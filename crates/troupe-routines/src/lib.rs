//! `troupe-routines` — scheduled work: system jobs (routing calibration,
//! team heartbeat ticks) and user reminders, all dispatched along one path.
//!
//! The `routine_jobs` table is the source of truth; a one-second poll in
//! [`engine::SchedulerEngine`] fires due jobs into the
//! [`executor::RoutineExecutor`], which owns the dispatch rules.

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod schedule;
pub mod tool;
pub mod types;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use executor::{
    AgentEntry, CalibrationGate, HeartbeatSink, OutboundPublisher, RoutineExecutor,
};
pub use schedule::compute_next_run;
pub use tool::{ScheduleAction, ScheduleTool};
pub use types::{Job, JobPayload, JobStatus, Schedule};
