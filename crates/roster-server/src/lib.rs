//! Roster Server Library
//!
//! HTTP server and background import engine for the provider directory.
//!
//! # Overview
//!
//! - **Imports**: bulk loading of provider and organization listings from the
//!   public registry extract or from uploaded CSV / spreadsheet files
//! - **Job tracking**: every import is a job with live progress and a final
//!   outcome, queryable over the API
//! - **Storage Backend**: uploaded files are read from S3-compatible storage
//! - **Configuration**: Environment-based configuration management
//!
//! # Architecture
//!
//! Requests land in [`features`], which validate input and hand off to the
//! [`ingest::ImportOrchestrator`]. The orchestrator records the job, then
//! runs the import pipeline on a detached task:
//!
//! ```text
//! source -> decoder -> transformer -> deduplicator -> batch writer -> sink
//!                                          \-> progress reporter -> job store
//! ```
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP routing and extraction
//! - **SQLx**: PostgreSQL job store and entity sink
//! - **Tower**: Middleware and service abstractions

pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod storage;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

// Re-export commonly used types
pub use error::AppError;

/// Create the application router with all routes and middleware
///
/// `db` is used by the health check only; without a pool the check reports
/// the database as not configured.
pub fn create_router(
    orchestrator: ingest::ImportOrchestrator,
    db: Option<PgPool>,
    cors: &config::CorsConfig,
) -> Router {
    let feature_routes = features::router(features::FeatureState { orchestrator });

    Router::new()
        .route("/health", get(health_check))
        .with_state(db)
        .nest("/api/v1", feature_routes)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

/// Health check handler
async fn health_check(State(db): State<Option<PgPool>>) -> Result<Response, StatusCode> {
    let Some(db) = db else {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "not configured"
            })),
        )
            .into_response());
    };

    match sqlx::query("SELECT 1").fetch_one(&db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
