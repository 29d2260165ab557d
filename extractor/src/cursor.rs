use crate::model::Cursor;
use async_trait::async_trait;
use extractor_core::Result;
use metrics::counter;
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Atomic per-resource-type cursor persistence. `read` returning `None`
/// means no prior extraction, which makes the next run a full-history fetch.
/// A write replaces all four fields in one statement; readers never observe
/// a half-written cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn read(&self, resource_type: &str) -> Result<Option<Cursor>>;
    async fn write(&self, cursor: &Cursor) -> Result<()>;
}

pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    #[instrument(skip(self))]
    async fn read(&self, resource_type: &str) -> Result<Option<Cursor>> {
        let cursor = sqlx::query_as::<_, Cursor>(
            r#"
            SELECT resource_type, last_updated, extracted_at, record_count
            FROM extraction_cursors
            WHERE resource_type = $1
            "#,
        )
        .bind(resource_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor)
    }

    #[instrument(skip(self, cursor), fields(resource_type = %cursor.resource_type))]
    async fn write(&self, cursor: &Cursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO extraction_cursors (resource_type, last_updated, extracted_at, record_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (resource_type) DO UPDATE SET
                last_updated = EXCLUDED.last_updated,
                extracted_at = EXCLUDED.extracted_at,
                record_count = EXCLUDED.record_count
            "#,
        )
        .bind(&cursor.resource_type)
        .bind(cursor.last_updated)
        .bind(cursor.extracted_at)
        .bind(cursor.record_count)
        .execute(&self.pool)
        .await?;

        counter!("extractor_cursor_writes").increment(1);

        debug!(
            last_updated = ?cursor.last_updated,
            record_count = cursor.record_count,
            "Saved cursor"
        );

        Ok(())
    }
}
