//! Postgres job store
//!
//! Exclusivity is enforced by the partial unique index
//! `import_jobs_one_active_exclusive`, so concurrent submissions race safely
//! in the database rather than in the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_common::types::{ImportJob, ImportResult, JobKind, JobProgress, JobStatus};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{refused, JobStore, StoreError, StoreResult};

const EXCLUSIVE_INDEX: &str = "import_jobs_one_active_exclusive";

const JOB_COLUMNS: &str = r#"
    id, kind, status, source_ref, target_collection, notify_address,
    progress_percent, progress_message, processed_count, total_count,
    result, error_detail, created_at, updated_at, completed_at
"#;

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    status: String,
    source_ref: String,
    target_collection: String,
    notify_address: Option<String>,
    progress_percent: i16,
    progress_message: String,
    processed_count: i64,
    total_count: Option<i64>,
    result: Option<Json<ImportResult>>,
    error_detail: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for ImportJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |e: roster_common::RosterError| StoreError::Corrupt(format!("{}: {}", id, e));

        Ok(ImportJob {
            id,
            kind: row.kind.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            source_ref: row.source_ref,
            target: row.target_collection.parse().map_err(corrupt)?,
            notify_address: row.notify_address,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            progress: JobProgress {
                percent: row.progress_percent.clamp(0, 100) as u8,
                message: row.progress_message,
                processed_count: row.processed_count.max(0) as u64,
                total_count: row.total_count.map(|t| t.max(0) as u64),
            },
            result: row.result.map(|Json(result)| result),
            error_detail: row.error_detail,
        })
    }
}

fn is_exclusive_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(EXCLUSIVE_INDEX),
        _ => false,
    }
}

/// Stored statuses a guarded update to `to` may start from
fn sources(to: JobStatus) -> Vec<&'static str> {
    JobStatus::predecessors(to).map(|status| status.as_str()).collect()
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Job store backed by the `import_jobs` table
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> StoreResult<Option<JobStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM import_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|s| s.parse().map_err(|e| StoreError::Corrupt(format!("{}: {}", id, e))))
            .transpose()
    }

    /// Turn a zero-row guarded update into the matching error
    async fn guarded(&self, id: Uuid, rows: u64, to: JobStatus) -> StoreResult<()> {
        if rows > 0 {
            return Ok(());
        }
        Err(refused(id, self.current_status(id).await?, to))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &ImportJob) -> StoreResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, kind, exclusive, status, source_ref, target_collection, notify_address,
                progress_percent, progress_message, processed_count, total_count,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(job.kind.is_exclusive())
        .bind(job.status.as_str())
        .bind(&job.source_ref)
        .bind(job.target.as_str())
        .bind(&job.notify_address)
        .bind(i16::from(job.progress.percent))
        .bind(&job.progress.message)
        .bind(to_i64(job.progress.processed_count))
        .bind(job.progress.total_count.map(to_i64))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                debug!(job_id = %job.id, kind = %job.kind, "Created import job");
                Ok(())
            },
            Err(e) if is_exclusive_violation(&e) => Err(StoreError::Conflict(job.kind)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<ImportJob>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {} FROM import_jobs WHERE id = $1", JOB_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ImportJob::try_from).transpose()
    }

    async fn list(&self, kind: Option<JobKind>, limit: usize) -> StoreResult<Vec<ImportJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM import_jobs
            WHERE ($1::TEXT IS NULL OR kind = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            JOB_COLUMNS
        ))
        .bind(kind.map(|k| k.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ImportJob::try_from).collect()
    }

    async fn mark_running(&self, id: Uuid) -> StoreResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'running', progress_message = 'Starting', updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(sources(JobStatus::Running))
        .execute(&self.pool)
        .await?
        .rows_affected();

        self.guarded(id, rows, JobStatus::Running).await
    }

    async fn update_progress(&self, id: Uuid, progress: &JobProgress) -> StoreResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE import_jobs
            SET progress_percent = GREATEST(progress_percent, $2),
                progress_message = $3,
                processed_count = $4,
                total_count = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(i16::from(progress.percent))
        .bind(&progress.message)
        .bind(to_i64(progress.processed_count))
        .bind(progress.total_count.map(to_i64))
        .execute(&self.pool)
        .await?
        .rows_affected();

        self.guarded(id, rows, JobStatus::Running).await
    }

    async fn complete(&self, id: Uuid, result: &ImportResult) -> StoreResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'completed',
                progress_percent = 100,
                progress_message = 'Completed',
                processed_count = $2,
                result = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(to_i64(result.total_rows))
        .bind(Json(result))
        .bind(sources(JobStatus::Completed))
        .execute(&self.pool)
        .await?
        .rows_affected();

        self.guarded(id, rows, JobStatus::Completed).await?;
        info!(job_id = %id, "Import job completed");
        Ok(())
    }

    async fn fail(&self, id: Uuid, detail: &str, result: Option<&ImportResult>) -> StoreResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'failed',
                progress_message = 'Failed',
                result = $3,
                error_detail = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(detail)
        .bind(result.map(Json))
        .bind(sources(JobStatus::Failed))
        .execute(&self.pool)
        .await?
        .rows_affected();

        self.guarded(id, rows, JobStatus::Failed).await?;
        info!(job_id = %id, detail, "Import job failed");
        Ok(())
    }

    async fn fail_interrupted(&self, detail: &str) -> StoreResult<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'failed',
                progress_message = 'Failed',
                error_detail = $1,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status = ANY($2)
            "#,
        )
        .bind(detail)
        .bind(sources(JobStatus::Failed))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }
}
