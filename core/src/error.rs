use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bearer token rejected by FHIR server")]
    AuthExpired,

    #[error("token acquisition failed: {0}")]
    Auth(String),

    #[error("rate limited by FHIR server")]
    RateLimit { retry_after: Option<Duration> },

    #[error("FHIR server error: HTTP {status}")]
    Server { status: u16 },

    #[error("FHIR request rejected: HTTP {status}: {body}")]
    Request { status: u16, body: String },

    #[error("malformed response: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("retries exhausted for {operation} after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transient failures the retry policy is allowed to recover from.
    /// Everything else is fatal for the current resource type's run;
    /// `AuthExpired` is neither: the fetcher handles it via token refresh.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Http(_)
                | Error::RateLimit { .. }
                | Error::Server { .. }
                | Error::Io(_)
        )
    }

    /// Server-specified minimum delay before the next attempt (429 Retry-After).
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }
}
