//! Heimdall error types

use std::time::Duration;

/// Heimdall error types.
///
/// The enum is `Clone` because fetch results are shared between every
/// waiter coalesced onto the same in-flight request. Foreign errors
/// (reqwest, serde_json) are mapped to string-carrying variants at the
/// point they occur.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    // Upstream/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// The URL is in backoff and no request was issued.
    ///
    /// Carries what a client needs to decide when to retry. Does not
    /// imply anything about the cache; callers recover to a stale entry
    /// where one exists.
    #[error("'{url}' in backoff, retry after {retry_after:?} ({consecutive_errors} consecutive errors)")]
    Backoff {
        url: String,
        retry_after: Duration,
        consecutive_errors: u32,
    },

    // Data errors
    /// The upstream responded but the payload failed the caching policy.
    /// The backend is alive, so this never feeds backoff.
    #[error("response for '{url}' rejected by validation: {reason}")]
    ValidationRejected { url: String, reason: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("proxy is shutting down")]
    ShuttingDown,
}

impl ProxyError {
    /// Whether this error means the upstream is unreachable rather than
    /// misbehaving. The front-end maps unavailable-class errors to 503
    /// when no cache entry can cover for them; everything else is a 500.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ProxyError::Http(_) | ProxyError::Timeout(_) | ProxyError::Backoff { .. }
        )
    }

    /// Whether this error should feed the per-URL backoff accounting.
    ///
    /// Validation rejections are excluded: the backend answered, it just
    /// answered with something we refuse to cache.
    pub fn counts_as_upstream_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::Http(_) | ProxyError::Timeout(_) | ProxyError::UpstreamStatus { .. }
        )
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(crate::upstream::UPSTREAM_TIMEOUT)
        } else {
            ProxyError::Http(err.to_string())
        }
    }
}

/// Result type alias for Heimdall operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
