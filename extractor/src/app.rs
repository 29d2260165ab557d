use crate::auth::{ClientCredentialsProvider, TokenProvider};
use crate::coordinator::Coordinator;
use crate::cursor::{CursorStore, PgCursorStore};
use crate::fetcher::PageFetcher;
use crate::fhir::{FhirSearchClient, HttpFhirClient};
use crate::model::ExtractionReport;
use crate::sink::{BronzeSink, PgBronzeSink};
use extractor_core::{Config, Result, RetryPolicy};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Wires the concrete collaborators together: one shared HTTP client for the
/// token endpoint and the FHIR server, Postgres-backed cursor store and
/// bronze sink on one pool.
pub struct App {
    config: Config,
    coordinator: Coordinator,
}

impl App {
    #[instrument(skip(config, pool))]
    pub async fn new(config: Config, pool: PgPool) -> Result<Self> {
        info!("Initializing extraction service");

        // Health check
        sqlx::query("SELECT 1").execute(&pool).await?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fhir.request_timeout_secs))
            .build()?;

        let tokens: Arc<dyn TokenProvider> =
            Arc::new(ClientCredentialsProvider::new(http.clone(), &config.fhir));
        let client: Arc<dyn FhirSearchClient> =
            Arc::new(HttpFhirClient::new(http, config.fhir.base_url.clone()));

        let retry = RetryPolicy::from_config(&config.retry);
        let fetcher = Arc::new(PageFetcher::new(
            client,
            tokens,
            retry.clone(),
            config.extract.page_size,
        ));

        let cursors: Arc<dyn CursorStore> = Arc::new(PgCursorStore::new(pool.clone()));
        let sink: Arc<dyn BronzeSink> = Arc::new(PgBronzeSink::new(pool));

        let coordinator =
            Coordinator::new(fetcher, cursors, sink, retry, config.extract.clone());

        Ok(Self {
            config,
            coordinator,
        })
    }

    pub async fn run_extract(&self, full: bool) -> ExtractionReport {
        self.coordinator.run_job(full).await
    }

    /// Repeats extraction on the configured interval until interrupted.
    /// Failed resource types simply retry from their last good watermark on
    /// the next cycle.
    pub async fn run_poll(&self) -> Result<()> {
        let interval = Duration::from_secs(self.config.extract.poll_interval_secs);

        loop {
            self.coordinator.run_job(false).await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}
