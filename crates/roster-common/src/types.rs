//! Import job types shared between the server and its clients
//!
//! These are the records persisted by the job store and returned verbatim by
//! the status API. JSON field names are camelCase; enum values are the
//! lowercase strings stored in the `import_jobs` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RosterError;

// ============================================================================
// Enumerations
// ============================================================================

/// Kind of import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Streamed import of the national provider registry extract
    RegistryImport,
    /// User-uploaded CSV or spreadsheet fetched from object storage
    GenericUpload,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RegistryImport => "registry_import",
            JobKind::GenericUpload => "generic_upload",
        }
    }

    /// At most one job of an exclusive kind may be pending or running.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, JobKind::RegistryImport)
    }
}

impl std::str::FromStr for JobKind {
    type Err = RosterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "registry_import" => Ok(JobKind::RegistryImport),
            "generic_upload" => Ok(JobKind::GenericUpload),
            other => Err(RosterError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an import job
///
/// Transitions are monotonic: `Pending -> Running -> Completed | Failed`.
/// A job may also fail straight from `Pending` when its run never starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` respects the state machine
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    /// Statuses that may move to `next` in one step
    pub fn predecessors(next: JobStatus) -> impl Iterator<Item = JobStatus> {
        Self::ALL
            .into_iter()
            .filter(move |status| status.can_transition_to(next))
    }
}

impl std::str::FromStr for JobStatus {
    type Err = RosterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(RosterError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection that imported entities are written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetCollection {
    Providers,
    Organizations,
}

impl TargetCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetCollection::Providers => "providers",
            TargetCollection::Organizations => "organizations",
        }
    }
}

impl std::str::FromStr for TargetCollection {
    type Err = RosterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "providers" => Ok(TargetCollection::Providers),
            "organizations" => Ok(TargetCollection::Organizations),
            other => Err(RosterError::UnknownTarget(other.to_string())),
        }
    }
}

impl std::fmt::Display for TargetCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Progress and result payloads
// ============================================================================

/// One rejected field of one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Row number as seen in the source file (the header is row 1)
    pub row_number: u64,
    pub field: String,
    pub raw_value: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        row_number: u64,
        field: impl Into<String>,
        raw_value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_number,
            field: field.into(),
            raw_value: raw_value.into(),
            message: message.into(),
        }
    }
}

/// Live progress of a running job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// 0 to 100, never decreases
    pub percent: u8,
    pub message: String,
    pub processed_count: u64,
    /// Known only for bounded sources
    pub total_count: Option<u64>,
}

impl JobProgress {
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Outcome summary written when a job reaches a terminal state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Rows decoded from the source
    pub total_rows: u64,
    pub successful_rows: u64,
    pub failed_rows: u64,
    pub duplicate_rows: u64,
    /// Capped list, in row order
    pub errors: Vec<ValidationError>,
}

impl ImportResult {
    /// Rows with a counted outcome; skipped rows are not included
    pub fn counted_rows(&self) -> u64 {
        self.successful_rows + self.failed_rows + self.duplicate_rows
    }
}

// ============================================================================
// Import job record
// ============================================================================

/// Persistent import job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Remote URL or object key the job reads from
    pub source_ref: String,
    pub target: TargetCollection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: JobProgress,
    pub result: Option<ImportResult>,
    /// Terminal failure cause, only set when `status` is `failed`
    pub error_detail: Option<String>,
}

impl ImportJob {
    /// A freshly submitted job
    pub fn pending(
        kind: JobKind,
        source_ref: impl Into<String>,
        target: TargetCollection,
        notify_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            source_ref: source_ref.into(),
            target,
            notify_address,
            created_at: now,
            updated_at: now,
            completed_at: None,
            progress: JobProgress::new(0, "Queued"),
            result: None,
            error_detail: None,
        }
    }
}
