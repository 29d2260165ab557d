pub mod http;

use crate::model::ResourcePage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use extractor_core::Result;

/// One authenticated FHIR search request, one page back.
///
/// `next_url` is the opaque continuation link from the previous page; when
/// absent, a fresh search is issued for the resource type with the watermark
/// filter. Implementations map authorization failures to `Error::AuthExpired`
/// so the fetcher can refresh the token and replay the same request.
#[async_trait]
pub trait FhirSearchClient: Send + Sync {
    async fn search_page(
        &self,
        resource_type: &str,
        since: Option<DateTime<Utc>>,
        page_size: u32,
        next_url: Option<&str>,
        bearer_token: &str,
    ) -> Result<ResourcePage>;
}

pub use http::HttpFhirClient;
