use crate::cursor::CursorStore;
use crate::fetcher::PageFetcher;
use crate::model::{Cursor, ExtractionReport, ResourceOutcome, RunStats};
use crate::sink::BronzeSink;
use chrono::Utc;
use extractor_core::config::ExtractConfig;
use extractor_core::{Result, RetryPolicy};
use futures::stream::{self, StreamExt};
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Drives one extraction job across the configured resource types.
///
/// Each resource type runs through
/// read cursor → fetch/write page loop → advance cursor,
/// and its cursor is written only after every page of the run landed in
/// bronze. A failure anywhere before that leaves the cursor at its pre-run
/// value, so the next job re-fetches from the same safe watermark. Resource
/// types are independent: one failing never aborts its siblings.
pub struct Coordinator {
    fetcher: Arc<PageFetcher>,
    cursors: Arc<dyn CursorStore>,
    sink: Arc<dyn BronzeSink>,
    retry: RetryPolicy,
    config: ExtractConfig,
}

impl Coordinator {
    pub fn new(
        fetcher: Arc<PageFetcher>,
        cursors: Arc<dyn CursorStore>,
        sink: Arc<dyn BronzeSink>,
        retry: RetryPolicy,
        config: ExtractConfig,
    ) -> Self {
        Self {
            fetcher,
            cursors,
            sink,
            retry,
            config,
        }
    }

    /// Runs every configured resource type, up to `max_concurrent_types` at a
    /// time, and reports per-type outcomes. `full` ignores stored watermarks
    /// for this run (cursor advancement stays monotonic either way).
    #[instrument(skip(self))]
    pub async fn run_job(&self, full: bool) -> ExtractionReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(
            %run_id,
            resource_types = self.config.resource_types.len(),
            full,
            "Starting extraction job"
        );

        let outcomes = stream::iter(self.config.resource_types.clone())
            .map(|resource_type| async move {
                let outcome = self.extract_resource_type(&resource_type, full).await;
                match &outcome {
                    Ok(stats) => info!(
                        resource_type = resource_type.as_str(),
                        records = stats.records,
                        pages = stats.pages,
                        watermark = ?stats.watermark,
                        "Resource type extracted"
                    ),
                    Err(e) => error!(
                        resource_type = resource_type.as_str(),
                        error = %e,
                        "Resource type failed, cursor left at pre-run value"
                    ),
                }
                ResourceOutcome {
                    resource_type,
                    outcome,
                }
            })
            .buffer_unordered(self.config.max_concurrent_types.max(1))
            .collect::<Vec<_>>()
            .await;

        let report = ExtractionReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        info!(
            %run_id,
            records = report.total_records(),
            failed = report.failed().count(),
            "Extraction job finished"
        );

        report
    }

    async fn extract_resource_type(&self, resource_type: &str, full: bool) -> Result<RunStats> {
        let prior = self
            .retry
            .execute("read_cursor", || self.cursors.read(resource_type))
            .await?;
        let since = if full {
            None
        } else {
            prior.as_ref().and_then(|c| c.last_updated)
        };

        let mut next: Option<String> = None;
        let mut pages = 0u64;
        let mut records = 0u64;
        // Seeded with the prior watermark so it can only move forward.
        let mut watermark = prior.as_ref().and_then(|c| c.last_updated);

        loop {
            let page = self
                .fetcher
                .fetch_page(resource_type, since, next.as_deref())
                .await?;
            pages += 1;

            if !page.resources.is_empty() {
                self.retry
                    .execute("write_bronze", || {
                        self.sink.write_page(resource_type, &page.resources)
                    })
                    .await?;

                // True count of resources seen, not the requested page size.
                records += page.resources.len() as u64;

                if let Some(seen) = page.max_last_updated() {
                    watermark = Some(watermark.map_or(seen, |w| w.max(seen)));
                }
            }

            match page.next {
                Some(url) => next = Some(url),
                // Server omitted the continuation link. Also covers Epic
                // ending a set short of its advertised total.
                None => break,
            }
        }

        let cursor = Cursor {
            resource_type: resource_type.to_string(),
            last_updated: watermark,
            extracted_at: Utc::now(),
            record_count: records as i64,
        };
        self.retry
            .execute("write_cursor", || self.cursors.write(&cursor))
            .await?;

        counter!("extractor_resources_extracted", "resource_type" => resource_type.to_string())
            .increment(records);

        Ok(RunStats {
            pages,
            records,
            watermark,
        })
    }
}
