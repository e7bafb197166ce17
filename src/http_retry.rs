//! Shared retry policy for the outbound HTTP clients (C2/C3/C4): exponential
//! backoff (base 2s, cap 8s, 3 attempts) under a 30s per-attempt deadline.
//! 4xx responses are not retried; everything else transient is.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::{debug, warn};

use crate::error::EngineError;

pub const MAX_ATTEMPTS: u32 = 3;
pub const BASE_BACKOFF: Duration = Duration::from_secs(2);
pub const MAX_BACKOFF: Duration = Duration::from_secs(8);
pub const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

fn backoff_for(attempt: u32) -> Duration {
    let scaled = BASE_BACKOFF.saturating_mul(1 << attempt.min(4));
    scaled.min(MAX_BACKOFF)
}

/// Issue `send` up to `MAX_ATTEMPTS` times. A 4xx response is returned
/// immediately as `ProviderError` with no retry. A 5xx response or a
/// transport-level failure is retried with backoff; after the last attempt
/// it is converted to `ProviderError`.
pub async fn send_with_retry<F, Fut>(
    provider: &'static str,
    mut build_request: F,
) -> Result<Response, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = reqwest::Result<Response>>,
{
    let mut last_err: Option<EngineError> = None;

    for attempt in 0..MAX_ATTEMPTS {
        let outcome = tokio::time::timeout(PER_ATTEMPT_TIMEOUT, build_request()).await;

        match outcome {
            Err(_elapsed) => {
                warn!(provider, attempt, "request timed out after 30s");
                last_err = Some(EngineError::NetworkTransient(format!(
                    "{provider}: timed out after {:?}",
                    PER_ATTEMPT_TIMEOUT
                )));
            }
            Ok(Err(transport_err)) => {
                warn!(provider, attempt, error = %transport_err, "transport error");
                last_err = Some(EngineError::NetworkTransient(format!(
                    "{provider}: {transport_err}"
                )));
            }
            Ok(Ok(resp)) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                if is_client_error(status) {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(EngineError::ProviderError {
                        source: provider,
                        message: format!("{status}: {}", truncate(&body, 300)),
                    });
                }
                // 5xx: retry.
                debug!(provider, attempt, %status, "server error, retrying");
                last_err = Some(EngineError::ProviderError {
                    source: provider,
                    message: format!("server error: {status}"),
                });
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(backoff_for(attempt)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| EngineError::ProviderError {
        source: provider,
        message: "exhausted retries with no recorded error".to_string(),
    }))
}

fn is_client_error(status: StatusCode) -> bool {
    status.is_client_error()
}

/// Truncates to at most `max` *characters*, not bytes — `s` comes from an
/// arbitrary provider's error body and may contain multi-byte UTF-8, so a
/// raw byte-index slice could land mid-character and panic.
fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_for(0), Duration::from_secs(2));
        assert_eq!(backoff_for(1), Duration::from_secs(4));
        assert_eq!(backoff_for(2), Duration::from_secs(8));
        assert_eq!(backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn truncate_does_not_split_a_multibyte_char_at_the_boundary() {
        let s = "a".repeat(299) + "\u{1F600}" + "trailing";
        let truncated = truncate(&s, 300);
        assert_eq!(truncated.chars().count(), 300);
    }

    #[test]
    fn truncate_is_a_noop_under_the_limit() {
        assert_eq!(truncate("short", 300), "short");
    }
}
