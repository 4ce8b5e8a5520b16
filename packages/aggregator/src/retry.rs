//! HTTP retry helpers for transient aggregator errors.
//!
//! Aggregator requests go through [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so every request gets
//! automatic retry with exponential backoff for transient failures
//! (timeouts, connection resets, server errors, rate limiting).
//!
//! ```ignore
//! let body = retry::send_json(&policy, || client.post(&url).json(&payload)).await?;
//! ```

use std::time::Duration;

use crate::http::AggregatorError;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// How many times to retry and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three retries at 1s, 2s, 4s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (since builders are consumed by
/// `.send()`).
///
/// Retries connection errors, timeouts, HTTP 429, and HTTP 5xx up to
/// `policy.max_retries` times. Does **not** retry other HTTP 4xx; those
/// are permanent. A 4xx or 5xx body that is valid JSON is still returned
/// inside [`AggregatorError::Status`] so callers can read the
/// aggregator's own failure classification.
///
/// # Errors
///
/// Returns [`AggregatorError`] if the request fails after all retries, the
/// server returns a non-retryable status code, or the body is not JSON.
pub async fn send_json<F>(
    policy: &RetryPolicy,
    build_request: F,
) -> Result<serde_json::Value, AggregatorError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            log::warn!("  retry {attempt}/{} in {delay:?}...", policy.max_retries);
            tokio::time::sleep(delay).await;
        }

        let retries_left = attempt < policy.max_retries;
        attempt += 1;

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) => {
                if is_transient(&e) && retries_left {
                    log::warn!("  transient error: {e}");
                    continue;
                }
                return Err(AggregatorError::Http(e));
            }
        };

        let status = response.status();
        if is_retryable_status(status) && retries_left {
            log::warn!("  HTTP {status} from aggregator");
            continue;
        }

        let url = response.url().to_string();
        let text = response.text().await?;

        let parsed = serde_json::from_str::<serde_json::Value>(&text);

        if !status.is_success() {
            return Err(AggregatorError::Status {
                status: status.as_u16(),
                body: parsed.ok(),
            });
        }

        return parsed.map_err(|e| {
            let preview = if text.len() > BODY_PREVIEW_LEN {
                format!("{}...", text.chars().take(BODY_PREVIEW_LEN).collect::<String>())
            } else {
                text.clone()
            };
            log::error!(
                "JSON parse failed.\n  \
                 url: {url}\n  \
                 status: {status}\n  \
                 received: {} bytes\n  \
                 parse error: {e}\n  \
                 body preview: {preview}",
                text.len(),
            );
            AggregatorError::Json(e)
        });
    }
}

/// Returns `true` for statuses worth retrying (429 and 5xx).
#[must_use]
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn no_retry_policy_has_zero_delay() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.delay_for(5), Duration::ZERO);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(
            reqwest::StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(!is_retryable_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(reqwest::StatusCode::OK));
    }
}
