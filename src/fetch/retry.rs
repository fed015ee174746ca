//! Rate-Limit-Aware Fetcher
//!
//! Wraps a single HTTP request with bounded retry on `429 Too Many Requests`.
//! Any other status is handed back to the caller untouched; when the retry
//! budget runs out the fetcher fails with [`SyncError::RateLimited`] so a
//! higher layer can decide to keep trying.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::sync::{SyncContext, SyncProgress};

/// Longest slice of an error body kept in [`SyncError::Http`].
const ERROR_BODY_LIMIT: usize = 512;

// == Rate Limit Policy ==
/// Retry budget for rate-limited requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Total requests sent for one logical fetch, including the first
    pub max_attempts: u32,
    /// Wait between attempts when the upstream sends no `Retry-After`
    pub backoff: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RateLimitPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.rate_limit_max_attempts.max(1),
            backoff: Duration::from_millis(config.rate_limit_backoff_ms),
        }
    }
}

// == HTTP Client ==
/// Shared HTTP client carrying the rate-limit policy. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    policy: RateLimitPolicy,
}

impl HttpClient {
    pub fn new(client: Client, policy: RateLimitPolicy) -> Self {
        Self { client, policy }
    }

    /// Builds a client with the configured request timeout and retry policy.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::new(client, RateLimitPolicy::from_config(config)))
    }

    /// The underlying reqwest client, for building requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    // == Fetch With Retry ==
    /// Sends `request`, retrying while the upstream answers 429.
    ///
    /// Returns the first non-429 response whatever its status. After
    /// `max_attempts` rate-limited responses, fails with `RateLimited`.
    pub async fn fetch_with_retry(&self, request: Request, ctx: &SyncContext) -> Result<Response> {
        let max_attempts = self.policy.max_attempts.max(1);
        let url = request.url().clone();

        for attempt in 1..=max_attempts {
            ctx.check_cancelled()?;

            let attempt_request = request.try_clone().ok_or_else(|| {
                SyncError::Internal(format!("request to {} cannot be replayed", url))
            })?;

            let response = self.client.execute(attempt_request).await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                if attempt > 1 {
                    info!("Request to {} succeeded after {} attempts", url.path(), attempt);
                }
                return Ok(response);
            }

            if attempt == max_attempts {
                break;
            }

            let wait = retry_after(response.headers()).unwrap_or(self.policy.backoff);
            warn!(
                "Rate limited by {} (attempt {}/{}), retrying in {:?}",
                url.host_str().unwrap_or("upstream"),
                attempt,
                max_attempts,
                wait
            );
            ctx.report(SyncProgress::RateLimited {
                attempt,
                retry_in_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            });
            ctx.sleep(wait).await?;
        }

        warn!("Giving up on {} after {} rate-limited attempts", url.path(), max_attempts);
        Err(SyncError::RateLimited {
            attempts: max_attempts,
        })
    }
}

// == Response Helpers ==
/// Parses a `Retry-After` header given in whole seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Maps non-success statuses to errors: 401/403 to `Unauthorized`, anything
/// else outside 2xx to `Http`.
pub async fn expect_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Unauthorized(
            format!("{} rejected credentials ({})", status.as_u16(), message),
        )),
        _ => Err(SyncError::Http {
            status: status.as_u16(),
            message,
        }),
    }
}

/// Reads the body and decodes it strictly; malformed JSON is a `Parse` error.
pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().clone();
    let bytes = response.bytes().await?;
    debug!("Decoding {} bytes from {}", bytes.len(), url.path());
    serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::Parse(format!("{}: {}", url.path(), e)))
}
