//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `url` — the full request URL (cache key)
//! - `status` — outcome: "ok" or "error"
//! - `source` — where a response came from: "cache" or "upstream"

/// Total client lookups served from the cache.
///
/// Labels: none (per-key counts live in the statistics snapshot).
pub const CACHE_HITS_TOTAL: &str = "heimdall_cache_hits_total";

/// Total client lookups that missed the cache.
pub const CACHE_MISSES_TOTAL: &str = "heimdall_cache_misses_total";

/// Total stale-while-revalidate refreshes dispatched to the worker.
pub const STALE_REFRESHES_TOTAL: &str = "heimdall_stale_refreshes_total";

/// Total responses rejected by the caching policy.
pub const VALIDATION_REJECTS_TOTAL: &str = "heimdall_validation_rejects_total";

/// Total requests dispatched to the upstream.
///
/// Labels: `status` ("ok" | "error").
pub const UPSTREAM_REQUESTS_TOTAL: &str = "heimdall_upstream_requests_total";

/// Upstream request duration in seconds.
pub const UPSTREAM_DURATION_SECONDS: &str = "heimdall_upstream_duration_seconds";

/// Total upstream failures (5xx, transport errors, timeouts).
pub const UPSTREAM_ERRORS_TOTAL: &str = "heimdall_upstream_errors_total";

/// Total fetches rejected without dispatch because the URL was in backoff.
pub const BACKOFF_REJECTS_TOTAL: &str = "heimdall_backoff_rejects_total";

/// Current depth of the upstream request queue.
pub const QUEUE_DEPTH: &str = "heimdall_queue_depth";

/// Time a request spent queued before dispatch, in seconds.
pub const QUEUE_WAIT_SECONDS: &str = "heimdall_queue_wait_seconds";

/// Total scheduler ticks skipped because the polled URL was in backoff.
pub const POLL_SKIPS_TOTAL: &str = "heimdall_poll_skips_total";
