//! JSON-over-HTTP helper shared by the embedding providers and the
//! completion client.
//!
//! Retries are opt-in: with `max_retries = 0` every call is attempted
//! exactly once.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// POST `body` as JSON and decode the JSON response into `T`.
///
/// Callers wrap the error chain into a stage-specific [`crate::Error`]
/// variant with `{:#}`.
pub async fn post_json<B, T>(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
    max_retries: u32,
) -> Result<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            warn!(url, attempt, delay_secs = delay.as_secs(), "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url, status = status.as_u16(), "response received");

                if status.is_success() {
                    return response
                        .json::<T>()
                        .await
                        .with_context(|| format!("invalid response from {}", url));
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("HTTP {} from {}: {}", status, url, body_text.trim());

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!(message));
                    continue;
                }

                bail!(message);
            }
            Err(e) => {
                let context = if e.is_timeout() {
                    format!("request to {} timed out", url)
                } else {
                    format!("request to {} failed", url)
                };
                last_err = Some(anyhow::Error::new(e).context(context));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("request to {} failed", url)))
}

/// Build a client with a per-request timeout.
pub fn client_with_timeout(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build HTTP client")
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
