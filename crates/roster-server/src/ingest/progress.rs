//! Progress reporting
//!
//! Writes `JobProgress` to the store at milestones and otherwise at most once
//! per interval. Percent is estimated from the source's progress basis,
//! capped at 99 until the job completes and never reported lower than before.

use roster_common::types::JobProgress;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use super::store::JobStore;

/// Highest percent reported before completion
pub const MAX_RUNNING_PERCENT: u8 = 99;

/// What percent is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressBasis {
    /// Unbounded stream; bytes received against an estimate
    Bytes { estimated_total: u64 },
    /// Bounded source with a known row count
    Rows { total: u64 },
}

/// Counters the reporter reads at each write
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub bytes_read: u64,
}

impl ProgressBasis {
    pub fn percent(&self, snapshot: ProgressSnapshot) -> u8 {
        let (done, total) = match *self {
            ProgressBasis::Bytes { estimated_total } => (snapshot.bytes_read, estimated_total),
            ProgressBasis::Rows { total } => (snapshot.processed, total),
        };

        if total == 0 {
            return 0;
        }

        let percent = (u128::from(done) * 100 / u128::from(total)).min(u128::from(MAX_RUNNING_PERCENT));
        percent as u8
    }

    pub fn total_rows(&self) -> Option<u64> {
        match *self {
            ProgressBasis::Rows { total } => Some(total),
            ProgressBasis::Bytes { .. } => None,
        }
    }
}

pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    basis: ProgressBasis,
    interval: Duration,
    last_write: Option<Instant>,
    last_percent: u8,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid, basis: ProgressBasis, interval: Duration) -> Self {
        Self {
            store,
            job_id,
            basis,
            interval,
            last_write: None,
            last_percent: 0,
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Write now, regardless of the interval
    pub async fn milestone(&mut self, snapshot: ProgressSnapshot, message: impl Into<String>) {
        self.write(snapshot, message.into()).await;
    }

    /// Write only if the interval has elapsed since the last write
    pub async fn tick(&mut self, snapshot: ProgressSnapshot) {
        let due = self
            .last_write
            .map_or(true, |last| last.elapsed() >= self.interval);

        if due {
            let message = format!("Processed {} rows", snapshot.processed);
            self.write(snapshot, message).await;
        }
    }

    async fn write(&mut self, snapshot: ProgressSnapshot, message: String) {
        let percent = self.basis.percent(snapshot).max(self.last_percent);
        let progress = JobProgress {
            percent,
            message,
            processed_count: snapshot.processed,
            total_count: self.basis.total_rows(),
        };

        self.last_write = Some(Instant::now());
        self.last_percent = percent;

        // A failed progress write never stops the import
        if let Err(e) = self.store.update_progress(self.job_id, &progress).await {
            warn!(job_id = %self.job_id, "Failed to record progress: {}", e);
        }
    }
}
