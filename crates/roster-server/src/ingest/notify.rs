//! Completion notifications
//!
//! Sent once a job reaches a terminal state and it names a notify address.
//! Delivery is best effort: failures are logged and never touch the job.

use async_trait::async_trait;
use reqwest::Client;
use roster_common::types::{ImportJob, ImportResult, JobStatus};
use serde::Serialize;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub total_rows: u64,
    pub successful_rows: u64,
    pub failed_rows: u64,
    pub duplicate_rows: u64,
    pub error_count: usize,
}

impl From<&ImportResult> for ResultSummary {
    fn from(result: &ImportResult) -> Self {
        Self {
            total_rows: result.total_rows,
            successful_rows: result.successful_rows,
            failed_rows: result.failed_rows,
            duplicate_rows: result.duplicate_rows,
            error_count: result.errors.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub address: String,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result_summary: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl NotificationPayload {
    /// Payload for a finished job, if it asked to be notified
    pub fn for_job(job: &ImportJob) -> Option<Self> {
        let address = job.notify_address.clone()?;
        Some(Self {
            address,
            job_id: job.id,
            status: job.status,
            result_summary: job.result.as_ref().map(ResultSummary::from),
            error_detail: job.error_detail.clone(),
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payload: &NotificationPayload) -> anyhow::Result<()>;
}

/// Posts the payload as JSON to a webhook
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> anyhow::Result<()> {
        self.client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;

        info!(job_id = %payload.job_id, endpoint = %self.endpoint, "Sent import notification");
        Ok(())
    }
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> anyhow::Result<()> {
        info!(
            job_id = %payload.job_id,
            address = %payload.address,
            status = %payload.status,
            summary = ?payload.result_summary,
            "Import finished"
        );
        Ok(())
    }
}
