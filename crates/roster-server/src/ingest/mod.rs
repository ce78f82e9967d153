//! Bulk import pipeline
//!
//! Streams large tabular sources into the provider directory while a
//! persisted [`ImportJob`](roster_common::types::ImportJob) tracks the run.
//!
//! # Architecture
//!
//! - **store**: persistent job records (`JobStore`, Postgres and in-memory)
//! - **source**: byte chunk streams from a remote URL or a stored object
//! - **decoder**: carry-over line splitting, quoted field tokenizing, headers
//! - **workbook**: spreadsheet sources read sheet-first with calamine
//! - **transform**: row classification into entity / skip / reject
//! - **reference**: versioned classification labels and allow-lists
//! - **dedup**: per-run composite key suppression
//! - **sink** / **writer**: batched entity persistence with failure isolation
//! - **progress**: throttled progress writes
//! - **pipeline**: one run, stage by stage, over a `RunState`
//! - **orchestrator**: submission, exclusivity, supervised background runs
//! - **notify**: fire-and-forget completion notifications
//!
//! # Public API
//!
//! HTTP endpoints live in `features::imports`:
//! - `POST /api/v1/imports` - submit a job
//! - `GET /api/v1/imports/:job_id` - job snapshot
//! - `GET /api/v1/imports` - recent jobs

pub mod config;
pub mod decoder;
pub mod dedup;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod reference;
pub mod sink;
pub mod source;
pub mod store;
pub mod transform;
pub mod workbook;
pub mod writer;

use roster_common::types::JobKind;
use uuid::Uuid;

pub use config::ImportConfig;
pub use decoder::{Header, RawRecord, RecordSource};
pub use models::{OrganizationRecord, ProviderRecord, TargetEntity};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use orchestrator::{ImportOrchestrator, SubmitImport};
pub use pipeline::{ImportPipeline, RunState};
pub use reference::ReferenceData;
pub use sink::{EntitySink, PgEntitySink, SinkError};
pub use source::ObjectFetcher;
pub use store::{JobStore, MemoryJobStore, PgJobStore, StoreError};
pub use transform::{Outcome, Transformer};

// Batch size constants
pub const DEFAULT_REMOTE_BATCH_SIZE: usize = 100;
pub const DEFAULT_OBJECT_BATCH_SIZE: usize = 500;

/// Result type for import operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Errors that halt an import or reject a request
///
/// Row-level problems never appear here: they are recorded as
/// `ValidationError`s and batch failures are absorbed by the writer.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Cannot decode source: {0}")]
    ParseFatal(String),

    #[error("An import of kind {0} is already pending or running")]
    Conflict(JobKind),

    #[error("Import job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid import request: {0}")]
    InvalidRequest(String),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}
