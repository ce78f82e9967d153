//! One import run
//!
//! Opens the job's source and drives every record through
//! decode -> classify -> dedup -> batch write, reporting progress as it goes.
//! All counters live in a [`RunState`] owned by the caller, so a run that
//! fails halfway still leaves an accurate partial result behind.

use roster_common::types::{ImportJob, ImportResult, JobKind, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::config::ImportConfig;
use super::decoder::{RecordReader, RecordSource};
use super::dedup::Deduplicator;
use super::progress::{ProgressBasis, ProgressReporter, ProgressSnapshot};
use super::reference::ReferenceData;
use super::sink::EntitySink;
use super::source::{
    chunked, count_data_lines, ObjectFetcher, RemoteSource, StoredObjectSource, REPLAY_CHUNK_SIZE,
};
use super::store::JobStore;
use super::transform::{Outcome, Transformer};
use super::workbook::{is_workbook, WorkbookReader};
use super::writer::BatchWriter;
use super::{ImportError, Result};

/// Counters for one run
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Rows decoded so far, whatever their outcome
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub duplicates: u64,
    /// Filtered out by the profile; not part of the result
    pub skipped: u64,
    pub bytes_read: u64,
    pub batches: u64,
    errors: Vec<ValidationError>,
    max_errors: usize,
}

impl RunState {
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            ..Default::default()
        }
    }

    /// Keep validation errors up to the reporting cap, in row order
    pub fn record_errors(&mut self, errors: Vec<ValidationError>) {
        let room = self.max_errors.saturating_sub(self.errors.len());
        self.errors.extend(errors.into_iter().take(room));
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed,
            bytes_read: self.bytes_read,
        }
    }

    pub fn result(&self) -> ImportResult {
        ImportResult {
            total_rows: self.processed,
            successful_rows: self.successful,
            failed_rows: self.failed,
            duplicate_rows: self.duplicates,
            errors: self.errors.clone(),
        }
    }
}

/// An opened source with its progress basis and batch size
struct OpenedSource {
    records: RecordSource,
    basis: ProgressBasis,
    batch_size: usize,
}

/// Runs import jobs end to end
#[derive(Clone)]
pub struct ImportPipeline {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn EntitySink>,
    fetcher: Arc<dyn ObjectFetcher>,
    reference: Arc<ReferenceData>,
    remote: RemoteSource,
    config: Arc<ImportConfig>,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<dyn EntitySink>,
        fetcher: Arc<dyn ObjectFetcher>,
        reference: Arc<ReferenceData>,
        config: Arc<ImportConfig>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            sink,
            fetcher,
            reference,
            remote: RemoteSource::new()?,
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Run `job` to exhaustion
    ///
    /// Marks the job running, then streams every record. Completion is left
    /// to the caller, which also owns `state`.
    pub async fn run(&self, job: &ImportJob, state: &mut RunState) -> Result<()> {
        self.store.mark_running(job.id).await?;

        let OpenedSource {
            mut records,
            basis,
            batch_size,
        } = self.open(job).await?;

        let mut reporter =
            ProgressReporter::new(Arc::clone(&self.store), job.id, basis, self.config.progress_interval());
        reporter.milestone(state.snapshot(), "Reading source").await;

        let transformer = Transformer::new(job.kind, job.target, Arc::clone(&self.reference));
        let header = records.header().await?;
        transformer.check_header(&header)?;
        debug!(job_id = %job.id, columns = header.len(), "Header accepted");

        let mut dedup = Deduplicator::new();
        let mut writer = BatchWriter::new(Arc::clone(&self.sink), job.id, job.target, batch_size);
        let long_pause_every = self.config.long_pause_every;

        while let Some(record) = records.next_record().await? {
            state.processed += 1;

            match transformer.classify(&record) {
                Outcome::Entity(entity) => {
                    if dedup.admit(&entity) {
                        writer.push(entity);
                    } else {
                        state.duplicates += 1;
                    }
                },
                Outcome::Skip => state.skipped += 1,
                Outcome::Reject(errors) => {
                    state.failed += 1;
                    state.record_errors(errors);
                },
            }

            state.bytes_read = records.bytes_read();

            if writer.is_full() {
                self.flush(&mut writer, state, &mut reporter).await;
            }

            if long_pause_every > 0 && state.processed % long_pause_every == 0 {
                pause(self.config.long_pause()).await;
            }

            reporter.tick(state.snapshot()).await;
        }

        state.bytes_read = records.bytes_read();
        self.flush(&mut writer, state, &mut reporter).await;

        info!(
            job_id = %job.id,
            processed = state.processed,
            successful = state.successful,
            failed = state.failed,
            duplicates = state.duplicates,
            skipped = state.skipped,
            "Source exhausted"
        );
        Ok(())
    }

    async fn open(&self, job: &ImportJob) -> Result<OpenedSource> {
        match job.kind {
            JobKind::RegistryImport => {
                let url = match job.source_ref.trim() {
                    "" => self.config.registry_url.as_str(),
                    url => url,
                };
                let chunks = self.remote.open(url).await?;

                Ok(OpenedSource {
                    records: RecordSource::Delimited(RecordReader::new(
                        chunks,
                        self.config.max_line_bytes,
                    )),
                    basis: ProgressBasis::Bytes {
                        estimated_total: self.config.registry_estimated_bytes,
                    },
                    batch_size: self.config.remote_batch_size,
                })
            },
            JobKind::GenericUpload => {
                let key = job.source_ref.trim();
                let data = StoredObjectSource::new(
                    Arc::clone(&self.fetcher),
                    self.config.fetch_attempts,
                    self.config.fetch_retry_delay(),
                )
                .fetch(key)
                .await?;

                let (records, total) = if is_workbook(key) {
                    let reader = tokio::task::spawn_blocking(move || WorkbookReader::open(data))
                        .await
                        .map_err(|e| ImportError::ParseFatal(format!("workbook reader stopped: {}", e)))??;
                    let total = reader.total_rows();
                    (RecordSource::Workbook(reader), total)
                } else {
                    let total = count_data_lines(&data);
                    let reader =
                        RecordReader::new(chunked(data, REPLAY_CHUNK_SIZE), self.config.max_line_bytes);
                    (RecordSource::Delimited(reader), total)
                };

                debug!(job_id = %job.id, key, total_rows = total, "Stored object opened");

                Ok(OpenedSource {
                    records,
                    basis: ProgressBasis::Rows { total },
                    batch_size: self.config.object_batch_size,
                })
            },
        }
    }

    async fn flush(&self, writer: &mut BatchWriter, state: &mut RunState, reporter: &mut ProgressReporter) {
        if writer.buffered() == 0 {
            return;
        }

        let outcome = writer.flush().await;
        state.successful += outcome.written;
        state.failed += outcome.failed;
        state.batches = writer.batches_flushed();

        reporter
            .milestone(
                state.snapshot(),
                format!("Wrote batch {} ({} rows processed)", state.batches, state.processed),
            )
            .await;

        pause(self.config.batch_pause()).await;
    }
}

/// Cooperative pause between units of work
async fn pause(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}
