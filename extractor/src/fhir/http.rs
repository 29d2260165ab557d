use super::FhirSearchClient;
use crate::model::{ResourcePage, SearchBundle};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use extractor_core::{Error, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

const ERROR_BODY_LIMIT: usize = 512;

pub struct HttpFhirClient {
    http: Client,
    base_url: String,
}

impl HttpFhirClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http, base_url }
    }

    /// Initial search URL for a resource type. Incremental runs filter with
    /// `_lastUpdated=gt<watermark>`; `_count` is advisory only.
    fn search_url(
        &self,
        resource_type: &str,
        since: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> String {
        let mut url = format!(
            "{}/{}?_count={}",
            self.base_url, resource_type, page_size
        );
        if let Some(since) = since {
            url.push_str("&_lastUpdated=gt");
            url.push_str(&since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        url
    }

    async fn classify_failure(response: Response) -> Error {
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthExpired,
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimit {
                retry_after: parse_retry_after(&response),
            },
            s if s.is_server_error() => Error::Server { status: s.as_u16() },
            s => {
                let mut body = response.text().await.unwrap_or_default();
                body.truncate(ERROR_BODY_LIMIT);
                Error::Request {
                    status: s.as_u16(),
                    body,
                }
            }
        }
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl FhirSearchClient for HttpFhirClient {
    #[instrument(skip(self, bearer_token, next_url))]
    async fn search_page(
        &self,
        resource_type: &str,
        since: Option<DateTime<Utc>>,
        page_size: u32,
        next_url: Option<&str>,
        bearer_token: &str,
    ) -> Result<ResourcePage> {
        let url = match next_url {
            Some(next) => next.to_string(),
            None => self.search_url(resource_type, since, page_size),
        };

        debug!(url = %url, "Requesting search page");

        let response = self
            .http
            .get(&url)
            .bearer_auth(bearer_token)
            .header(reqwest::header::ACCEPT, "application/fhir+json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        let bundle: SearchBundle = response
            .json()
            .await
            .map_err(|e| Error::Validation(format!("invalid bundle body: {e}")))?;

        let page = ResourcePage::from_bundle(bundle)?;

        debug!(
            resources = page.resources.len(),
            has_next = page.next.is_some(),
            total = ?page.total,
            "Fetched search page"
        );

        Ok(page)
    }
}
