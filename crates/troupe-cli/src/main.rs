//! `troupe` — schedule management CLI over the routines store.
//!
//! Talks directly to the jobs table the scheduler engine polls; a running
//! engine picks changes up on its next tick.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::warn;

use troupe_core::config::TroupeConfig;
use troupe_routines::{ScheduleAction, ScheduleTool, SchedulerEngine};

#[derive(Parser)]
#[command(name = "troupe", about = "Manage scheduled routines and reminders")]
struct Cli {
    /// Path to troupe.toml (defaults to ~/.troupe/troupe.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a reminder or recurring task
    Add {
        /// Reminder message or task description
        #[arg(long)]
        message: String,
        /// Interval in seconds (e.g. 3600 for hourly)
        #[arg(long)]
        every_seconds: Option<u64>,
        /// Cron expression (e.g. '0 2 * * *')
        #[arg(long)]
        cron_expr: Option<String>,
        /// Timezone for cron execution (e.g. 'America/New_York')
        #[arg(long)]
        timezone: Option<String>,
        /// ISO datetime for one-time execution (e.g. '2026-02-12T10:30:00')
        #[arg(long)]
        at: Option<String>,
    },
    /// Schedule routing calibration (defaults to daily at 2am)
    Calibrate {
        #[arg(long)]
        every_seconds: Option<u64>,
        #[arg(long)]
        cron_expr: Option<String>,
        #[arg(long)]
        timezone: Option<String>,
    },
    /// List scheduled jobs
    List,
    /// Remove a job by id
    Remove {
        #[arg(long)]
        job_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "troupe=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = TroupeConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        TroupeConfig::default()
    });

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(&config.database.path)?;
    let engine = Arc::new(SchedulerEngine::new(conn, None)?);
    let mut tool = ScheduleTool::new(engine, "UTC");
    tool.set_context("cli", "direct");

    let action = match cli.command {
        Command::Add {
            message,
            every_seconds,
            cron_expr,
            timezone,
            at,
        } => ScheduleAction::Add {
            message,
            every_seconds,
            cron_expr,
            timezone,
            at,
        },
        Command::Calibrate {
            every_seconds,
            cron_expr,
            timezone,
        } => ScheduleAction::Calibrate {
            every_seconds,
            cron_expr,
            timezone,
        },
        Command::List => ScheduleAction::List,
        Command::Remove { job_id } => ScheduleAction::Remove { job_id },
    };

    let output = tool.execute(action);
    let failed = output.starts_with("Error:");
    println!("{output}");
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
