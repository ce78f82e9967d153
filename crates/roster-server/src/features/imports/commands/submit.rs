//! Submit import command
//!
//! Creates an import job and starts it in the background. The response only
//! carries the job id; progress is read through the status query.

use roster_common::types::{JobKind, TargetCollection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{ImportError, ImportOrchestrator, SubmitImport};

/// Request body of `POST /imports`
///
/// ```json
/// {
///   "jobKind": "generic_upload",
///   "sourceReference": "uploads/2024/clinics.xlsx",
///   "targetCollection": "organizations",
///   "notifyAddress": "ops@example.org"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitImportCommand {
    pub job_kind: JobKind,

    /// Object key, or a URL for registry imports (empty uses the configured extract)
    #[serde(default)]
    pub source_reference: String,

    /// Defaults to providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_collection: Option<TargetCollection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitImportResponse {
    pub job_id: Uuid,
}

impl From<SubmitImportCommand> for SubmitImport {
    fn from(command: SubmitImportCommand) -> Self {
        SubmitImport {
            kind: command.job_kind,
            source_ref: command.source_reference,
            target: command.target_collection.unwrap_or(TargetCollection::Providers),
            notify_address: command.notify_address,
        }
    }
}

#[tracing::instrument(skip(orchestrator), fields(kind = %command.job_kind))]
pub async fn handle(
    orchestrator: &ImportOrchestrator,
    command: SubmitImportCommand,
) -> Result<SubmitImportResponse, ImportError> {
    let job_id = orchestrator.submit(command.into()).await?;
    Ok(SubmitImportResponse { job_id })
}
