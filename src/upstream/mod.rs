//! Bounded-concurrency gateway to the upstream service.
//!
//! This module owns everything that touches the backend: the keep-alive
//! HTTP client, the FIFO request queue with its concurrency cap, per-URL
//! exponential backoff, the sliding error-rate window, and the
//! recently-completed telemetry ring.
//!
//! The [`Upstream`] trait is the seam between the cache engine / poller
//! and the real [`ConnectionManager`]; tests substitute mock upstreams to
//! control timing and failure modes.

mod backoff;
mod manager;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

pub use backoff::{BackoffState, BackoffTracker, BACKOFF_INITIAL_DELAY, BACKOFF_MAX_DELAY};
pub use manager::{ConnectionManager, ForwardRequest};

/// Hard timeout on every upstream call.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// A successful upstream response.
///
/// "Successful" means transport-level: any status below 500 lands here,
/// including 4xx, so error bodies the backend intends clients to see can
/// be cached like any other response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub payload: Bytes,
    /// The replayed header subset (content-type, etag, last-modified).
    pub headers: Vec<(String, String)>,
    /// Wall time the call took, measured around the HTTP exchange only.
    pub duration: Duration,
}

/// Gateway the cache engine and poller fetch through.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue (or queue) a GET for the given full URL (path + query).
    ///
    /// Fails fast with [`ProxyError::Backoff`](crate::ProxyError) when the
    /// URL is in backoff, without consuming a queue slot.
    async fn fetch(&self, full_url: &str) -> Result<UpstreamResponse>;

    /// Time until the URL may be fetched again, if it is in backoff.
    fn backoff_remaining(&self, full_url: &str) -> Option<Duration> {
        let _ = full_url;
        None
    }
}
