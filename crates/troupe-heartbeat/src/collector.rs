use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::types::{TeamHealth, TeamHealthSource};

/// Buffer bound; the oldest record drops on overflow.
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// One polled snapshot for the dashboard feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub timestamp: DateTime<Utc>,
    pub team: TeamHealth,
}

/// Bounded ring of historical metrics.
pub struct MetricsBuffer {
    max_entries: usize,
    entries: Mutex<VecDeque<MetricsRecord>>,
}

impl Default for MetricsBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MetricsBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn add(&self, team: TeamHealth) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(MetricsRecord {
            timestamp: Utc::now(),
            team,
        });
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// The most recent `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<MetricsRecord> {
        let entries = self.entries.lock().unwrap();
        let start = entries.len().saturating_sub(limit);
        entries.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Polls the heartbeat manager at a fixed cadence and fills the buffer
/// the dashboard reads from.
pub struct MetricsCollector {
    source: Arc<dyn TeamHealthSource>,
    buffer: Arc<MetricsBuffer>,
    interval: Duration,
}

impl MetricsCollector {
    pub fn new(
        source: Arc<dyn TeamHealthSource>,
        buffer: Arc<MetricsBuffer>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            buffer,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs_f64(), "metrics collector started");
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.buffer.add(self.source.team_health());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("metrics collector shutting down");
                        break;
                    }
                }
            }
        }
    }
}
