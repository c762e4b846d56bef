//! Shared plumbing for remote backends: time bounds and HTTP retry.
//!
//! Every embedding and generation call made by the pipeline goes through
//! [`bounded`], so a hung backend surfaces as
//! [`QaError::BackendTimeout`] instead of stalling a rebuild or a question.
//!
//! # Retry Strategy
//!
//! [`post_json_with_retry`] retries transient failures with exponential
//! backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::future::Future;
use std::time::Duration;

use askdocs_core::{QaError, Result};

/// Run `fut`, failing with [`QaError::BackendTimeout`] after `secs` seconds.
///
/// A timed-out future is dropped, so no partial result escapes.
pub async fn bounded<T, F>(backend: &'static str, secs: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(backend, secs, "backend call timed out");
            Err(QaError::BackendTimeout { backend, secs })
        }
    }
}

/// Delay before retry `attempt` (1-based).
pub(crate) fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// POST a JSON body, retrying transient failures, and return the parsed
/// JSON response. Errors are returned as display strings so each caller
/// can wrap them in its own [`QaError`] variant.
pub(crate) async fn post_json_with_retry<F>(
    label: &str,
    max_retries: u32,
    request: F,
) -> std::result::Result<serde_json::Value, String>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff(attempt)).await;
            tracing::debug!(label, attempt, "retrying backend request");
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", label, e));
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429): don't retry
                return Err(format!("{} API error {}: {}", label, status, body_text));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", label)))
}

/// Build an HTTP client whose per-request timeout matches the backend budget.
pub(crate) fn http_client(timeout_secs: u64) -> std::result::Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_caps_at_32s() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(6), Duration::from_secs(32));
        assert_eq!(backoff(20), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let value = bounded("embedding", 5, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let err = bounded("generation", 1, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            QaError::BackendTimeout {
                backend: "generation",
                secs: 1
            }
        ));
    }
}
