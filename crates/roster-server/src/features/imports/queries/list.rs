//! List imports query
//!
//! Most recent jobs first, optionally filtered by kind.

use roster_common::types::{ImportJob, JobKind};
use serde::{Deserialize, Serialize};

use crate::ingest::{ImportError, ImportOrchestrator};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

/// `GET /imports?kind=registry_import&limit=10`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListImportsQuery {
    pub kind: Option<JobKind>,
    pub limit: Option<usize>,
}

impl ListImportsQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListImportsResponse {
    pub data: Vec<ImportJob>,
}

pub async fn handle(
    orchestrator: &ImportOrchestrator,
    query: ListImportsQuery,
) -> Result<ListImportsResponse, ImportError> {
    let data = orchestrator.list(query.kind, query.effective_limit()).await?;
    Ok(ListImportsResponse { data })
}
