//! Entity persistence
//!
//! The sink writes one batch at a time. A batch either lands completely or
//! not at all; the writer decides what a failure means for the job.

use async_trait::async_trait;
use roster_common::types::TargetCollection;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::models::{OrganizationRecord, ProviderRecord, TargetEntity};

/// Bind parameters PostgreSQL accepts in one statement
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Bound columns per `providers` row, the widest insert
pub const PROVIDER_COLUMNS: usize = 16;

/// Largest batch a single multi-row insert can carry
pub const MAX_BATCH_ROWS: usize = MAX_BIND_PARAMS / PROVIDER_COLUMNS;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Batch rejected: {0}")]
    Rejected(String),
}

/// Destination for validated entities
#[async_trait]
pub trait EntitySink: Send + Sync {
    /// Write one batch atomically, returning the rows written
    async fn insert_batch(
        &self,
        job_id: Uuid,
        target: TargetCollection,
        entities: &[TargetEntity],
    ) -> Result<u64, SinkError>;
}

/// Writes batches into the `providers` / `organizations` tables
#[derive(Clone)]
pub struct PgEntitySink {
    pool: PgPool,
}

impl PgEntitySink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn providers(entities: &[TargetEntity]) -> Result<Vec<&ProviderRecord>, SinkError> {
    entities
        .iter()
        .map(|e| match e {
            TargetEntity::Provider(p) => Ok(p),
            TargetEntity::Organization(o) => Err(SinkError::Rejected(format!(
                "organization '{}' in a providers batch",
                o.name
            ))),
        })
        .collect()
}

fn organizations(entities: &[TargetEntity]) -> Result<Vec<&OrganizationRecord>, SinkError> {
    entities
        .iter()
        .map(|e| match e {
            TargetEntity::Organization(o) => Ok(o),
            TargetEntity::Provider(p) => Err(SinkError::Rejected(format!(
                "provider '{}' in an organizations batch",
                p.display_name
            ))),
        })
        .collect()
}

#[async_trait]
impl EntitySink for PgEntitySink {
    async fn insert_batch(
        &self,
        job_id: Uuid,
        target: TargetCollection,
        entities: &[TargetEntity],
    ) -> Result<u64, SinkError> {
        if entities.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let written = match target {
            TargetCollection::Providers => {
                let rows = providers(entities)?;
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO providers (id, import_job_id, npi, first_name, last_name, \
                     display_name, credential, organization_name, taxonomy_code, specialty, \
                     category, address, city, state, postal_code, phone) ",
                );
                builder.push_values(rows, |mut b, p| {
                    b.push_bind(Uuid::new_v4())
                        .push_bind(job_id)
                        .push_bind(&p.npi)
                        .push_bind(&p.first_name)
                        .push_bind(&p.last_name)
                        .push_bind(&p.display_name)
                        .push_bind(&p.credential)
                        .push_bind(&p.organization_name)
                        .push_bind(&p.taxonomy_code)
                        .push_bind(&p.specialty)
                        .push_bind(&p.category)
                        .push_bind(&p.address)
                        .push_bind(&p.city)
                        .push_bind(&p.state)
                        .push_bind(&p.postal_code)
                        .push_bind(&p.phone);
                });
                builder.build().execute(&mut *tx).await?.rows_affected()
            },
            TargetCollection::Organizations => {
                let rows = organizations(entities)?;
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO organizations (id, import_job_id, name, category, address, \
                     city, state, postal_code, phone, website) ",
                );
                builder.push_values(rows, |mut b, o| {
                    b.push_bind(Uuid::new_v4())
                        .push_bind(job_id)
                        .push_bind(&o.name)
                        .push_bind(&o.category)
                        .push_bind(&o.address)
                        .push_bind(&o.city)
                        .push_bind(&o.state)
                        .push_bind(&o.postal_code)
                        .push_bind(&o.phone)
                        .push_bind(&o.website);
                });
                builder.build().execute(&mut *tx).await?.rows_affected()
            },
        };

        tx.commit().await?;
        debug!(%job_id, %target, written, "Inserted batch");
        Ok(written)
    }
}
