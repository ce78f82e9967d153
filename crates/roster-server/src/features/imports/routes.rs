use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::ingest::ImportOrchestrator;

use super::commands::{self, SubmitImportCommand};
use super::queries::{self, GetImportQuery, ListImportsQuery};

pub fn imports_routes() -> Router<ImportOrchestrator> {
    Router::new()
        .route("/imports", post(submit_import).get(list_imports))
        .route("/imports/:job_id", get(get_import))
}

#[tracing::instrument(skip(orchestrator, payload))]
async fn submit_import(
    State(orchestrator): State<ImportOrchestrator>,
    payload: Result<Json<SubmitImportCommand>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(command) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let response = commands::submit::handle(&orchestrator, command).await?;

    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

#[tracing::instrument(skip(orchestrator))]
async fn get_import(
    State(orchestrator): State<ImportOrchestrator>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let job = queries::get::handle(&orchestrator, GetImportQuery { job_id }).await?;
    Ok((StatusCode::OK, Json(job)).into_response())
}

#[tracing::instrument(skip(orchestrator))]
async fn list_imports(
    State(orchestrator): State<ImportOrchestrator>,
    Query(query): Query<ListImportsQuery>,
) -> Result<Response, AppError> {
    let response = queries::list::handle(&orchestrator, query).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}
