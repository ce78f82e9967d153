//! Get import query

use roster_common::types::ImportJob;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{ImportError, ImportOrchestrator};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetImportQuery {
    pub job_id: Uuid,
}

pub async fn handle(
    orchestrator: &ImportOrchestrator,
    query: GetImportQuery,
) -> Result<ImportJob, ImportError> {
    orchestrator.status(query.job_id).await
}
