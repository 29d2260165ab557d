use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use extractor_core::config::FhirConfig;
use extractor_core::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Supplies the bearer token consumed by the page fetcher. `refresh` discards
/// any cached token and acquires a new one; the fetcher calls it when the
/// server answers 401/403 mid-run.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
    async fn refresh(&self) -> Result<String>;
}

/// Refresh slightly before the server-reported expiry to avoid using a token
/// that dies in flight.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth2 client-credentials token provider with an in-memory cache.
pub struct ClientCredentialsProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    cached: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

impl ClientCredentialsProvider {
    pub fn new(http: Client, config: &FhirConfig) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            cached: RwLock::new(None),
        }
    }

    #[instrument(skip(self))]
    async fn acquire(&self) -> Result<CachedToken> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self.http.post(&self.token_url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token endpoint returned HTTP {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("invalid token response: {e}")))?;

        let lifetime = token.expires_in.unwrap_or(3600);
        debug!(lifetime_secs = lifetime, "Acquired bearer token");

        Ok(CachedToken {
            token: token.access_token,
            expires_at: expiry_for(lifetime, Utc::now()),
        })
    }
}

/// Expiry is exactly what the server reported. The freshness margin is
/// applied at read time, so short-lived tokens are simply refreshed eagerly
/// rather than recorded as living longer than they do.
fn expiry_for(lifetime_secs: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(lifetime_secs)
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn bearer_token(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.token.clone());
                }
            }
        }

        self.refresh().await
    }

    async fn refresh(&self) -> Result<String> {
        let fresh = self.acquire().await?;
        let token = fresh.token.clone();
        *self.cached.write().await = Some(fresh);
        Ok(token)
    }
}
