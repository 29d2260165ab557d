use crate::auth::TokenProvider;
use crate::fhir::FhirSearchClient;
use crate::model::ResourcePage;
use chrono::{DateTime, Utc};
use extractor_core::{Error, Result, RetryPolicy};
use metrics::histogram;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// Fetches one search page at a time for the coordinator's paging loop.
///
/// Every page is a single idempotent HTTP request, so the whole call sits
/// inside the retry policy. A 401/403 is handled out of band: the token is
/// refreshed and the same request replayed once without consuming a retry
/// attempt; a second rejection surfaces as fatal.
pub struct PageFetcher {
    client: Arc<dyn FhirSearchClient>,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
    page_size: u32,
}

impl PageFetcher {
    pub fn new(
        client: Arc<dyn FhirSearchClient>,
        tokens: Arc<dyn TokenProvider>,
        retry: RetryPolicy,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            tokens,
            retry,
            page_size,
        }
    }

    #[instrument(skip(self, next_url))]
    pub async fn fetch_page(
        &self,
        resource_type: &str,
        since: Option<DateTime<Utc>>,
        next_url: Option<&str>,
    ) -> Result<ResourcePage> {
        let start = Instant::now();

        let page = self
            .retry
            .execute("fetch_page", || async {
                let token = self.tokens.bearer_token().await?;
                match self
                    .client
                    .search_page(resource_type, since, self.page_size, next_url, &token)
                    .await
                {
                    Err(Error::AuthExpired) => {
                        debug!(resource_type, "Bearer token rejected, refreshing and replaying");
                        let token = self.tokens.refresh().await?;
                        self.client
                            .search_page(resource_type, since, self.page_size, next_url, &token)
                            .await
                    }
                    other => other,
                }
            })
            .await?;

        histogram!("extractor_fetch_duration_ms").record(start.elapsed().as_millis() as f64);
        histogram!("extractor_page_resources").record(page.resources.len() as f64);

        Ok(page)
    }
}
