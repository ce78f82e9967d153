//! Batch writer
//!
//! Accumulates entities and hands them to the sink in fixed-size batches.
//! A failed batch is counted as failed rows in full and the run carries on.

use roster_common::types::TargetCollection;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::TargetEntity;
use super::sink::EntitySink;

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub written: u64,
    pub failed: u64,
}

pub struct BatchWriter {
    sink: Arc<dyn EntitySink>,
    job_id: Uuid,
    target: TargetCollection,
    batch_size: usize,
    buffer: Vec<TargetEntity>,
    batches_flushed: u64,
}

impl BatchWriter {
    pub fn new(
        sink: Arc<dyn EntitySink>,
        job_id: Uuid,
        target: TargetCollection,
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            job_id,
            target,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            batches_flushed: 0,
        }
    }

    pub fn push(&mut self, entity: TargetEntity) {
        self.buffer.push(entity);
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }

    /// Write the buffered entities as one batch
    pub async fn flush(&mut self) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::default();
        }

        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        let size = batch.len() as u64;
        self.batches_flushed += 1;

        match self.sink.insert_batch(self.job_id, self.target, &batch).await {
            Ok(written) => {
                debug!(
                    job_id = %self.job_id,
                    batch = self.batches_flushed,
                    written,
                    "Flushed batch"
                );
                FlushOutcome {
                    written: written.min(size),
                    failed: size.saturating_sub(written),
                }
            },
            Err(e) => {
                warn!(
                    job_id = %self.job_id,
                    batch = self.batches_flushed,
                    size,
                    "Batch insert failed, counting every row as failed: {}",
                    e
                );
                FlushOutcome {
                    written: 0,
                    failed: size,
                }
            },
        }
    }
}
