//! In-memory job store
//!
//! Same semantics as the Postgres store, kept in a process-local map. Used by
//! tests and by embedders that do not need jobs to outlive the process.

use async_trait::async_trait;
use chrono::Utc;
use roster_common::types::{ImportJob, ImportResult, JobKind, JobProgress, JobStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{refused, JobStore, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, ImportJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the job to `to` if the state machine allows it, applying `update`
    async fn transition<F>(&self, id: Uuid, to: JobStatus, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut ImportJob),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !job.status.can_transition_to(to) {
            return Err(refused(id, Some(job.status), to));
        }

        job.status = to;
        update(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &ImportJob) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;

        if job.kind.is_exclusive()
            && jobs
                .values()
                .any(|existing| existing.kind == job.kind && existing.status.is_active())
        {
            return Err(StoreError::Conflict(job.kind));
        }

        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<ImportJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list(&self, kind: Option<JobKind>, limit: usize) -> StoreResult<Vec<ImportJob>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<ImportJob> = jobs
            .values()
            .filter(|job| kind.map_or(true, |k| job.kind == k))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn mark_running(&self, id: Uuid) -> StoreResult<()> {
        self.transition(id, JobStatus::Running, |job| {
            job.progress.message = "Starting".to_string();
        })
        .await
    }

    async fn update_progress(&self, id: Uuid, progress: &JobProgress) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.status != JobStatus::Running {
            return Err(refused(id, Some(job.status), JobStatus::Running));
        }

        let percent = job.progress.percent.max(progress.percent);
        job.progress = JobProgress {
            percent,
            ..progress.clone()
        };
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, id: Uuid, result: &ImportResult) -> StoreResult<()> {
        self.transition(id, JobStatus::Completed, |job| {
            job.progress.percent = 100;
            job.progress.message = "Completed".to_string();
            job.progress.processed_count = result.total_rows;
            job.result = Some(result.clone());
            job.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn fail(&self, id: Uuid, detail: &str, result: Option<&ImportResult>) -> StoreResult<()> {
        self.transition(id, JobStatus::Failed, |job| {
            job.progress.message = "Failed".to_string();
            job.result = result.cloned();
            job.error_detail = Some(detail.to_string());
            job.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn fail_interrupted(&self, detail: &str) -> StoreResult<u64> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut count = 0;

        for job in jobs.values_mut().filter(|job| job.status.can_transition_to(JobStatus::Failed)) {
            job.status = JobStatus::Failed;
            job.progress.message = "Failed".to_string();
            job.error_detail = Some(detail.to_string());
            job.completed_at = Some(now);
            job.updated_at = now;
            count += 1;
        }

        Ok(count)
    }
}
