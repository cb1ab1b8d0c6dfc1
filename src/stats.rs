//! Read-only statistics snapshots.
//!
//! These are pure data types composed by the cache engine and connection
//! manager and serialized straight onto the statistics endpoints. Each
//! snapshot is taken per-structure under that structure's own lock;
//! cross-component views are best-effort and may be mildly inconsistent.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Cache-side statistics (`GET /cache/stats`).
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Number of entries currently in the cache map.
    pub size: usize,
    /// Per-key detail, keyed by full URL.
    pub entries: HashMap<String, KeyStats>,
    /// Global upstream failure rate, events per minute over 10 minutes.
    pub error_rate: f64,
    /// Per-URL failure rates over the same window.
    pub error_rate_by_path: HashMap<String, f64>,
    /// URLs currently holding backoff state.
    pub backoff: HashMap<String, BackoffSnapshot>,
}

/// Per-key cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    /// Wall-clock time of the last successful fetch, if the key has an
    /// entry.
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub payload_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub avg_response_ms: f64,
    pub max_response_ms: u64,
}

/// One URL's backoff state as exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct BackoffSnapshot {
    pub consecutive_errors: u32,
    pub current_delay_ms: u64,
    /// Milliseconds until the next probe is allowed; 0 when the window
    /// has already elapsed.
    pub retry_in_ms: u64,
}

/// Connection-manager statistics (`GET /queue/stats`).
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue_length: usize,
    pub active_count: usize,
    pub max_concurrent: usize,
    pub queued_urls: Vec<String>,
    pub active: Vec<ActiveRequest>,
    /// Last 20 completions, newest first.
    pub recently_completed: Vec<CompletedRequest>,
}

/// An in-flight upstream request.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRequest {
    pub url: String,
    pub elapsed_ms: u64,
}

/// A finished upstream request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRequest {
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub runtime_ms: u64,
    pub success: bool,
}

/// Composed status document (`GET /health`).
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: String,
    pub uptime_secs: u64,
    pub cache_size: usize,
    pub queue_length: usize,
    pub active_requests: usize,
    pub backoff_urls: usize,
    pub error_rate: f64,
}
