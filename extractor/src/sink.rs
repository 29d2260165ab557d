use crate::model::{resource_id, resource_last_updated, resource_version};
use async_trait::async_trait;
use extractor_core::{Error, Result};
use metrics::counter;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Raw-resource storage layer. A page is written all-or-nothing; the sink
/// deduplicates by resource id + version, which is what lets extraction
/// re-fetch from the last safe watermark after a failed run (at-least-once).
#[async_trait]
pub trait BronzeSink: Send + Sync {
    /// Returns the number of rows actually inserted (duplicates excluded).
    async fn write_page(&self, resource_type: &str, resources: &[Value]) -> Result<usize>;
}

pub struct PgBronzeSink {
    pool: PgPool,
}

// 5 bind parameters per row; PostgreSQL caps a statement at 65535.
const ROWS_PER_STATEMENT: usize = 5_000;

impl PgBronzeSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BronzeSink for PgBronzeSink {
    #[instrument(skip(self, resources))]
    async fn write_page(&self, resource_type: &str, resources: &[Value]) -> Result<usize> {
        if resources.is_empty() {
            return Ok(0);
        }

        // One transaction per page keeps the all-or-nothing contract.
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for chunk in resources.chunks(ROWS_PER_STATEMENT) {
            let mut values = Vec::with_capacity(chunk.len());
            for i in 0..chunk.len() {
                let base = i * 5;
                values.push(format!(
                    "(${}, ${}, ${}, ${}, ${})",
                    base + 1,
                    base + 2,
                    base + 3,
                    base + 4,
                    base + 5
                ));
            }

            let statement = format!(
                r#"
                INSERT INTO bronze_resources (
                    resource_type, resource_id, version_id, last_updated, payload
                ) VALUES {}
                ON CONFLICT (resource_type, resource_id, version_id)
                DO NOTHING
                "#,
                values.join(", ")
            );

            let mut query = sqlx::query(&statement);
            for resource in chunk {
                let id = resource_id(resource).ok_or_else(|| {
                    Error::Validation(format!("{resource_type} resource without an id"))
                })?;
                query = query
                    .bind(resource_type)
                    .bind(id.to_string())
                    .bind(resource_version(resource).unwrap_or("1").to_string())
                    .bind(resource_last_updated(resource))
                    .bind(resource.clone());
            }

            let result = query.execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        counter!("extractor_resources_written", "resource_type" => resource_type.to_string())
            .increment(inserted as u64);

        debug!(
            total = resources.len(),
            inserted,
            duplicates = resources.len() - inserted,
            "Wrote bronze page"
        );

        Ok(inserted)
    }
}
