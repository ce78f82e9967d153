//! Job store
//!
//! Persistent record of import job state. Every implementation enforces the
//! job state machine itself: updates that would move a job backwards or out of
//! a terminal state are refused with [`StoreError::InvalidTransition`], and
//! progress percent never decreases.

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use async_trait::async_trait;
use roster_common::types::{ImportJob, ImportResult, JobKind, JobProgress, JobStatus};
use uuid::Uuid;

/// Result type for job store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Job store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("An active {0} job already exists")]
    Conflict(JobKind),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

/// Storage for import job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job
    ///
    /// For exclusive kinds the check for another pending or running job and
    /// the insert happen atomically; a clash returns [`StoreError::Conflict`]
    /// and nothing is written.
    async fn create(&self, job: &ImportJob) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<ImportJob>>;

    /// Most recent jobs first
    async fn list(&self, kind: Option<JobKind>, limit: usize) -> StoreResult<Vec<ImportJob>>;

    /// Pending -> Running
    async fn mark_running(&self, id: Uuid) -> StoreResult<()>;

    /// Update progress of a running job; the stored percent never decreases
    async fn update_progress(&self, id: Uuid, progress: &JobProgress) -> StoreResult<()>;

    /// Running -> Completed, recording the result and 100 percent
    async fn complete(&self, id: Uuid, result: &ImportResult) -> StoreResult<()>;

    /// Pending | Running -> Failed
    async fn fail(&self, id: Uuid, detail: &str, result: Option<&ImportResult>) -> StoreResult<()>;

    /// Fail every job left pending or running by a previous process
    async fn fail_interrupted(&self, detail: &str) -> StoreResult<u64>;
}

/// Resolve why a guarded update touched no row
pub(crate) fn refused(id: Uuid, current: Option<JobStatus>, to: JobStatus) -> StoreError {
    match current {
        None => StoreError::NotFound(id),
        Some(from) => StoreError::InvalidTransition { id, from, to },
    }
}
