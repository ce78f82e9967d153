//! Common test utilities for Roster server integration tests
//!
//! In-memory stand-ins for the object store, the entity sink and the job
//! store, plus a helper that builds a fully wired [`ImportOrchestrator`].
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestHarness;
//!
//! #[tokio::test]
//! async fn test_upload() {
//!     let harness = TestHarness::new();
//!     harness.fetcher.put("uploads/a.csv", "first_name,last_name\nAda,Lovelace\n");
//!     // submit through harness.orchestrator, then harness.wait_for_terminal(id)
//! }
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use roster_common::types::{ImportJob, ImportResult, JobKind, JobProgress, TargetCollection};
use roster_server::ingest::{
    EntitySink, ImportConfig, ImportOrchestrator, ImportPipeline, JobStore, LogNotifier,
    MemoryJobStore, Notifier, ObjectFetcher, ReferenceData, SinkError, StoreError, TargetEntity,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

type StoreResult<T> = Result<T, StoreError>;

/// Object store backed by a map
#[derive(Default)]
pub struct MemoryFetcher {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.to_string(), data.into());
    }
}

#[async_trait]
impl ObjectFetcher for MemoryFetcher {
    async fn fetch(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such key: {}", key))
    }
}

/// Sink that keeps every written entity
///
/// Batches are numbered from 1 in arrival order; numbers listed in
/// `failing` are refused, and a batch listed in `panicking` panics.
#[derive(Default)]
pub struct MemorySink {
    failing: HashSet<usize>,
    panicking: HashSet<usize>,
    calls: Mutex<usize>,
    written: Mutex<Vec<(Uuid, TargetEntity)>>,
}

impl MemorySink {
    pub fn failing_batches(batches: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing: batches.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn panicking_batch(batch: usize) -> Self {
        Self {
            panicking: HashSet::from([batch]),
            ..Default::default()
        }
    }

    pub fn written(&self) -> Vec<TargetEntity> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EntitySink for MemorySink {
    async fn insert_batch(
        &self,
        job_id: Uuid,
        _target: TargetCollection,
        entities: &[TargetEntity],
    ) -> Result<u64, SinkError> {
        let batch = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };

        if self.panicking.contains(&batch) {
            panic!("sink exploded on batch {}", batch);
        }
        if self.failing.contains(&batch) {
            return Err(SinkError::Rejected(format!("batch {} refused", batch)));
        }

        let mut written = self.written.lock().unwrap();
        written.extend(entities.iter().map(|e| (job_id, e.clone())));
        Ok(entities.len() as u64)
    }
}

/// Job store that records every progress percent it is asked to write
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    percents: Mutex<Vec<u8>>,
}

impl RecordingStore {
    pub fn percents(&self) -> Vec<u8> {
        self.percents.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create(&self, job: &ImportJob) -> StoreResult<()> {
        self.inner.create(job).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<ImportJob>> {
        self.inner.get(id).await
    }

    async fn list(&self, kind: Option<JobKind>, limit: usize) -> StoreResult<Vec<ImportJob>> {
        self.inner.list(kind, limit).await
    }

    async fn mark_running(&self, id: Uuid) -> StoreResult<()> {
        self.inner.mark_running(id).await
    }

    async fn update_progress(&self, id: Uuid, progress: &JobProgress) -> StoreResult<()> {
        self.percents.lock().unwrap().push(progress.percent);
        self.inner.update_progress(id, progress).await
    }

    async fn complete(&self, id: Uuid, result: &ImportResult) -> StoreResult<()> {
        self.inner.complete(id, result).await
    }

    async fn fail(&self, id: Uuid, detail: &str, result: Option<&ImportResult>) -> StoreResult<()> {
        self.inner.fail(id, detail, result).await
    }

    async fn fail_interrupted(&self, detail: &str) -> StoreResult<u64> {
        self.inner.fail_interrupted(detail).await
    }
}

/// A wired orchestrator over in-memory collaborators
pub struct TestHarness {
    pub orchestrator: ImportOrchestrator,
    pub store: Arc<dyn JobStore>,
    pub sink: Arc<MemorySink>,
    pub fetcher: Arc<MemoryFetcher>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// Poll until the job is completed or failed
    pub async fn wait_for_terminal(&self, id: Uuid) -> ImportJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.orchestrator.status(id).await.expect("job exists");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} still {} after 10s",
                id,
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[derive(Default)]
pub struct TestHarnessBuilder {
    store: Option<Arc<dyn JobStore>>,
    sink: Option<Arc<MemorySink>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: Option<ImportConfig>,
}

impl TestHarnessBuilder {
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: MemorySink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(mut self, config: ImportConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> TestHarness {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>);
        let sink = self.sink.unwrap_or_default();
        let fetcher = Arc::new(MemoryFetcher::default());
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let config = self.config.unwrap_or_else(ImportConfig::without_pauses);

        let pipeline = ImportPipeline::new(
            Arc::clone(&store),
            Arc::clone(&sink) as Arc<dyn EntitySink>,
            Arc::clone(&fetcher) as Arc<dyn ObjectFetcher>,
            Arc::new(ReferenceData::bundled().expect("bundled reference data")),
            Arc::new(config),
        )
        .expect("pipeline");

        TestHarness {
            orchestrator: ImportOrchestrator::new(pipeline, notifier),
            store,
            sink,
            fetcher,
        }
    }
}

/// A provider upload with `rows` distinct people
pub fn provider_csv(rows: usize) -> String {
    let mut csv = String::from("first_name,last_name,state,zip\n");
    for i in 0..rows {
        csv.push_str(&format!("Given{},Family{},WA,98{:03}\n", i, i, i % 1000));
    }
    csv
}
