//! Feature modules implementing the Roster API
//!
//! Each feature is a vertical slice with its own commands, queries and
//! routes.
//!
//! # Features
//!
//! - **imports**: submit bulk imports and track their progress
//!
//! # Architecture
//!
//! Each feature module follows the structure:
//! - `commands/` - Write operations
//! - `queries/` - Read operations
//! - `routes.rs` - HTTP route definitions

pub mod imports;

use axum::Router;

use crate::ingest::ImportOrchestrator;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// Entry point for import submission and status
    pub orchestrator: ImportOrchestrator,
}

/// Creates the API router with all feature routes
///
/// - `/imports` - Import submission and job status
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().merge(imports::imports_routes().with_state(state.orchestrator))
}
