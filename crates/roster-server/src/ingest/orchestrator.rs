//! Job orchestration
//!
//! Accepts import requests, creates the job record and runs the pipeline on a
//! detached task. The task is supervised: whatever happens inside the run
//! (success, error or panic), the job ends in `completed` or `failed`.

use futures::FutureExt;
use roster_common::types::{ImportJob, JobKind, TargetCollection};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::notify::{NotificationPayload, Notifier};
use super::pipeline::{ImportPipeline, RunState};
use super::store::{JobStore, StoreError, StoreResult};
use super::{ImportError, Result};

/// Attempts at writing a job's terminal state
const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Detail recorded on jobs left over by a previous process
pub const INTERRUPTED_DETAIL: &str = "interrupted by process restart";

/// A request to start an import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitImport {
    pub kind: JobKind,
    /// Remote URL for registry imports, object key for uploads
    pub source_ref: String,
    pub target: TargetCollection,
    pub notify_address: Option<String>,
}

impl SubmitImport {
    fn validate(&self) -> Result<()> {
        let source_ref = self.source_ref.trim();

        match self.kind {
            JobKind::RegistryImport => {
                if self.target != TargetCollection::Providers {
                    return Err(ImportError::InvalidRequest(
                        "registry imports can only target providers".to_string(),
                    ));
                }
                if !source_ref.is_empty()
                    && !(source_ref.starts_with("http://") || source_ref.starts_with("https://"))
                {
                    return Err(ImportError::InvalidRequest(format!(
                        "registry source must be an http(s) URL, got '{}'",
                        source_ref
                    )));
                }
            },
            JobKind::GenericUpload => {
                if source_ref.is_empty() {
                    return Err(ImportError::InvalidRequest(
                        "sourceReference is required for uploads".to_string(),
                    ));
                }
            },
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ImportOrchestrator {
    store: Arc<dyn JobStore>,
    pipeline: ImportPipeline,
    notifier: Arc<dyn Notifier>,
}

impl ImportOrchestrator {
    pub fn new(pipeline: ImportPipeline, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store: Arc::clone(pipeline.store()),
            pipeline,
            notifier,
        }
    }

    /// Create a pending job and start it in the background
    ///
    /// Returns as soon as the job record exists; the run itself is not awaited.
    pub async fn submit(&self, request: SubmitImport) -> Result<Uuid> {
        request.validate()?;

        let notify_address = request
            .notify_address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        let job = ImportJob::pending(
            request.kind,
            request.source_ref.trim(),
            request.target,
            notify_address,
        );

        self.store.create(&job).await.map_err(|e| match e {
            StoreError::Conflict(kind) => ImportError::Conflict(kind),
            other => ImportError::Store(other),
        })?;

        info!(job_id = %job.id, kind = %job.kind, target = %job.target, "Import job submitted");

        let job_id = job.id;
        self.spawn(job);
        Ok(job_id)
    }

    pub async fn status(&self, id: Uuid) -> Result<ImportJob> {
        self.store.get(id).await?.ok_or(ImportError::NotFound(id))
    }

    pub async fn list(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<ImportJob>> {
        Ok(self.store.list(kind, limit).await?)
    }

    /// Fail jobs a previous process left pending or running
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let count = self.store.fail_interrupted(INTERRUPTED_DETAIL).await?;
        if count > 0 {
            warn!(count, "Marked interrupted import jobs as failed");
        }
        Ok(count)
    }

    fn spawn(&self, job: ImportJob) {
        let orchestrator = self.clone();
        let span = info_span!("import_run", job_id = %job.id, kind = %job.kind);

        tokio::spawn(async move { orchestrator.supervise(job).await }.instrument(span));
    }

    async fn supervise(&self, job: ImportJob) {
        let mut state = RunState::new(self.pipeline.config().max_reported_errors);

        let outcome = AssertUnwindSafe(self.pipeline.run(&job, &mut state))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                let result = state.result();
                let store = Arc::clone(&self.store);
                finalize(job.id, || {
                    let store = Arc::clone(&store);
                    let result = result.clone();
                    async move { store.complete(job.id, &result).await }
                })
                .await;
            },
            Ok(Err(e)) => {
                let detail = format!("{:#}", anyhow::Error::from(e));
                error!(job_id = %job.id, "Import failed: {}", detail);
                self.record_failure(job.id, detail, &state).await;
            },
            Err(panic) => {
                let detail = format!("import task panicked: {}", panic_message(panic.as_ref()));
                error!(job_id = %job.id, "{}", detail);
                self.record_failure(job.id, detail, &state).await;
            },
        }

        self.notify(job.id).await;
    }

    async fn record_failure(&self, job_id: Uuid, detail: String, state: &RunState) {
        let result = (state.processed > 0).then(|| state.result());
        let store = Arc::clone(&self.store);

        finalize(job_id, || {
            let store = Arc::clone(&store);
            let detail = detail.clone();
            let result = result.clone();
            async move { store.fail(job_id, &detail, result.as_ref()).await }
        })
        .await;
    }

    async fn notify(&self, job_id: Uuid) {
        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!(%job_id, "Cannot load job for notification: {}", e);
                return;
            },
        };

        let Some(payload) = NotificationPayload::for_job(&job) else {
            return;
        };

        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&payload).await {
                warn!(job_id = %payload.job_id, "Import notification failed: {:#}", e);
            }
        });
    }
}

/// Write a terminal state, retrying transient store errors
async fn finalize<F, Fut>(job_id: Uuid, mut write: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = StoreResult<()>>,
{
    for attempt in 1..=FINALIZE_ATTEMPTS {
        match write().await {
            Ok(()) => return,
            Err(e @ (StoreError::InvalidTransition { .. } | StoreError::NotFound(_))) => {
                error!(%job_id, "Cannot finalize import job: {}", e);
                return;
            },
            Err(e) => {
                warn!(%job_id, "Finalize attempt {}/{} failed: {}", attempt, FINALIZE_ATTEMPTS, e);
                if attempt < FINALIZE_ATTEMPTS {
                    tokio::time::sleep(FINALIZE_RETRY_DELAY * attempt).await;
                }
            },
        }
    }

    error!(%job_id, "Giving up on recording the final job state");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
