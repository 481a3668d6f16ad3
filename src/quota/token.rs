//! OAuth access tokens for the Monitoring API.
//!
//! Tokens come either from configuration or from the GCE metadata server,
//! which is what Cloud Functions and Compute Engine expose to workloads.
//! Metadata tokens are cached until shortly before they expire.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Metadata server path serving the default service account token.
pub const METADATA_TOKEN_PATH: &str =
    "/computeMetadata/v1/instance/service-accounts/default/token";

/// Default metadata server address.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";

/// Cached tokens are refreshed this long before the server says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Error type for token retrieval.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("metadata server request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metadata server returned {0}")]
    Status(reqwest::StatusCode),

    #[error("metadata server returned an empty token")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// A bearer token and its lifetime, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub secret: String,
    pub expires_in: Option<Duration>,
}

/// Where access tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// A fixed bearer token.
    Static(String),
    /// The metadata server's default service account.
    Metadata { endpoint: String },
    /// Send requests without an `Authorization` header.
    Anonymous,
}

impl TokenSource {
    /// Get a bearer token, or `None` for anonymous access.
    pub async fn token(&self, http: &reqwest::Client) -> Result<Option<AccessToken>, TokenError> {
        match self {
            Self::Static(token) => Ok(Some(AccessToken {
                secret: token.clone(),
                expires_in: None,
            })),
            Self::Anonymous => Ok(None),
            Self::Metadata { endpoint } => {
                let url = format!("{}{}", endpoint.trim_end_matches('/'), METADATA_TOKEN_PATH);
                let response = http
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    return Err(TokenError::Status(status));
                }

                let token: MetadataToken = response.json().await?;
                if token.access_token.is_empty() {
                    return Err(TokenError::Empty);
                }
                tracing::debug!(
                    expires_in = ?token.expires_in,
                    "Fetched access token from metadata server"
                );
                Ok(Some(AccessToken {
                    secret: token.access_token,
                    expires_in: token.expires_in.map(Duration::from_secs),
                }))
            }
        }
    }
}

#[derive(Debug)]
struct CachedEntry {
    secret: String,
    refresh_at: Instant,
}

/// Reuses tokens from a [`TokenSource`] until they are about to expire.
///
/// Concurrent callers wait on the same refresh instead of each fetching.
#[derive(Debug)]
pub struct TokenCache {
    source: TokenSource,
    cached: Mutex<Option<CachedEntry>>,
}

impl TokenCache {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, fetching a new one when the cached one is stale.
    pub async fn get(&self, http: &reqwest::Client) -> Result<Option<String>, TokenError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.refresh_at {
                return Ok(Some(entry.secret.clone()));
            }
        }

        let Some(token) = self.source.token(http).await? else {
            return Ok(None);
        };
        *cached = token.expires_in.map(|lifetime| CachedEntry {
            secret: token.secret.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        });
        Ok(Some(token.secret))
    }
}
