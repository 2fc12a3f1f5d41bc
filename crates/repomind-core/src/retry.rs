// SPDX-License-Identifier: Apache-2.0

//! Retry logic with exponential backoff for transient failures.
//!
//! Provides helpers to detect retryable errors and configure exponential backoff
//! with jitter for HTTP requests to AI backends and GitHub.

use backon::ExponentialBuilder;

use crate::error::RepoMindError;

/// Default number of retries for transient failures.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Determines if an HTTP status code is retryable.
///
/// Retryable status codes are:
/// - 429 (Too Many Requests / Rate Limited)
/// - 500 (Internal Server Error)
/// - 502 (Bad Gateway)
/// - 503 (Service Unavailable)
/// - 504 (Gateway Timeout)
#[must_use]
pub fn is_retryable_http(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Determines if an octocrab error is retryable.
///
/// 403 is included for GitHub secondary rate limits.
#[must_use]
pub fn is_retryable_octocrab(e: &octocrab::Error) -> bool {
    match e {
        octocrab::Error::GitHub { source, .. } => {
            matches!(
                source.status_code.as_u16(),
                429 | 500 | 502 | 503 | 504 | 403
            )
        }
        octocrab::Error::Service { .. } | octocrab::Error::Hyper { .. } => true,
        _ => false,
    }
}

/// Determines if an anyhow error is retryable.
///
/// Checks for octocrab, reqwest, and `RepoMindError` variants carrying a
/// transient status.
#[must_use]
pub fn is_retryable_anyhow(e: &anyhow::Error) -> bool {
    if let Some(oct_err) = e.downcast_ref::<octocrab::Error>() {
        return is_retryable_octocrab(oct_err);
    }

    if let Some(req_err) = e.downcast_ref::<reqwest::Error>() {
        if req_err.is_timeout() || req_err.is_connect() {
            return true;
        }
        if let Some(status) = req_err.status() {
            return is_retryable_http(status.as_u16());
        }
    }

    if let Some(err) = e.downcast_ref::<RepoMindError>() {
        return match err {
            RepoMindError::RateLimited { .. } => true,
            RepoMindError::AI {
                status: Some(status),
                ..
            } => is_retryable_http(*status),
            RepoMindError::Network(req_err) => req_err.is_timeout() || req_err.is_connect(),
            _ => false,
        };
    }

    false
}

/// Creates a configured exponential backoff builder for retries.
///
/// - Factor: 2 (exponential growth)
/// - Min delay: 1 second
/// - Max times: `max_retries`
/// - Jitter: enabled
#[must_use]
pub fn retry_backoff(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_factor(2.0)
        .with_min_delay(std::time::Duration::from_secs(1))
        .with_max_times(max_retries)
        .with_jitter()
}

/// Maximum retry-after delay to prevent excessive waits (120 seconds).
const MAX_RETRY_AFTER_SECS: u64 = 120;

/// Extracts the `retry_after` value from a `RateLimited` error if present.
///
/// Caps the value at `MAX_RETRY_AFTER_SECS`.
#[must_use]
pub fn extract_retry_after(e: &anyhow::Error) -> Option<std::time::Duration> {
    if let Some(RepoMindError::RateLimited { retry_after, .. }) = e.downcast_ref::<RepoMindError>()
        && *retry_after > 0
    {
        let capped = (*retry_after).min(MAX_RETRY_AFTER_SECS);
        return Some(std::time::Duration::from_secs(capped));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_http_retryable_codes() {
        assert!(is_retryable_http(429));
        assert!(is_retryable_http(500));
        assert!(is_retryable_http(502));
        assert!(is_retryable_http(503));
        assert!(is_retryable_http(504));
    }

    #[test]
    fn test_is_retryable_http_non_retryable_codes() {
        assert!(!is_retryable_http(400));
        assert!(!is_retryable_http(401));
        assert!(!is_retryable_http(403));
        assert!(!is_retryable_http(404));
        assert!(!is_retryable_http(200));
    }

    #[test]
    fn test_is_retryable_anyhow_with_non_retryable() {
        let err = anyhow::anyhow!("some other error");
        assert!(!is_retryable_anyhow(&err));
    }

    #[test]
    fn test_is_retryable_anyhow_with_rate_limited() {
        let err = anyhow::anyhow!(RepoMindError::RateLimited {
            provider: "openai".to_string(),
            retry_after: 60,
        });
        assert!(is_retryable_anyhow(&err));
    }

    #[test]
    fn test_is_retryable_anyhow_with_ai_status() {
        let unavailable = anyhow::anyhow!(RepoMindError::AI {
            message: "busy".to_string(),
            status: Some(503),
            provider: "cluster-ai".to_string(),
        });
        assert!(is_retryable_anyhow(&unavailable));

        let not_found = anyhow::anyhow!(RepoMindError::AI {
            message: "no such model".to_string(),
            status: Some(404),
            provider: "cluster-ai".to_string(),
        });
        assert!(!is_retryable_anyhow(&not_found));
    }

    #[test]
    fn test_is_retryable_anyhow_with_model_not_found() {
        let err = anyhow::anyhow!(RepoMindError::ModelNotFound {
            provider: "cluster-ai".to_string(),
            model: "m".to_string(),
        });
        assert!(!is_retryable_anyhow(&err));
    }

    #[test]
    fn test_extract_retry_after_with_valid_value() {
        let err = anyhow::anyhow!(RepoMindError::RateLimited {
            provider: "anthropic".to_string(),
            retry_after: 60,
        });
        assert_eq!(
            extract_retry_after(&err),
            Some(std::time::Duration::from_secs(60))
        );
    }

    #[test]
    fn test_extract_retry_after_with_zero_value() {
        let err = anyhow::anyhow!(RepoMindError::RateLimited {
            provider: "anthropic".to_string(),
            retry_after: 0,
        });
        assert_eq!(extract_retry_after(&err), None);
    }

    #[test]
    fn test_extract_retry_after_with_capped_value() {
        let err = anyhow::anyhow!(RepoMindError::RateLimited {
            provider: "anthropic".to_string(),
            retry_after: 300,
        });
        assert_eq!(
            extract_retry_after(&err),
            Some(std::time::Duration::from_secs(120))
        );
    }

    #[test]
    fn test_extract_retry_after_with_other_error() {
        let err = anyhow::anyhow!("some other error");
        assert_eq!(extract_retry_after(&err), None);
    }
}
