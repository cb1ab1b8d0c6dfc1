//! Cache entry snapshots.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::time::Instant;

/// Upper bound on the per-key request-duration ring.
pub const DURATION_RING_SIZE: usize = 25;

/// A single cached response snapshot.
///
/// Entries are immutable: a refresh builds a new entry (carrying the
/// duration ring forward) and replaces the old one wholesale in the map.
/// Readers holding an `Arc` to the old entry keep a consistent view.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Raw response body as received from the upstream.
    pub payload: Bytes,
    /// Replayed response headers (content-type, etag, last-modified).
    pub headers: Vec<(String, String)>,
    /// Upstream status code (4xx responses are cacheable).
    pub status: u16,
    /// Monotonic fetch time, used for all freshness arithmetic.
    pub fetched_at: Instant,
    /// Wall-clock fetch time, used for the `X-Cache-Timestamp` header
    /// and statistics only.
    pub fetched_at_wall: SystemTime,
    /// Time from fetch after which the entry no longer counts as a hit.
    pub ttl: Duration,
    /// Threshold after which a hit additionally triggers a background
    /// refresh. Invariant: `stale_time <= ttl`.
    pub stale_time: Duration,
    /// Durations of the most recent upstream fetches for this key,
    /// newest last, at most [`DURATION_RING_SIZE`] elements.
    pub request_durations: VecDeque<Duration>,
}

impl CacheEntry {
    /// Build a fresh entry, appending `duration` to the ring carried over
    /// from the entry being replaced (if any).
    pub fn new(
        payload: Bytes,
        headers: Vec<(String, String)>,
        status: u16,
        ttl: Duration,
        stale_time: Duration,
        duration: Duration,
        previous: Option<&CacheEntry>,
    ) -> Self {
        let mut request_durations = previous
            .map(|p| p.request_durations.clone())
            .unwrap_or_default();
        request_durations.push_back(duration);
        while request_durations.len() > DURATION_RING_SIZE {
            request_durations.pop_front();
        }
        Self {
            payload,
            headers,
            status,
            fetched_at: Instant::now(),
            fetched_at_wall: SystemTime::now(),
            ttl,
            stale_time,
            request_durations,
        }
    }

    /// Age of the entry against the monotonic clock.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Whether the entry may still be returned as a hit.
    pub fn is_valid(&self) -> bool {
        self.age() < self.ttl
    }

    /// Whether a hit on this entry should trigger a background refresh.
    /// Only meaningful while [`is_valid`](Self::is_valid) holds.
    pub fn is_stale(&self) -> bool {
        self.age() >= self.stale_time
    }

    /// Arithmetic mean of the duration ring, in milliseconds.
    pub fn avg_response_ms(&self) -> f64 {
        if self.request_durations.is_empty() {
            return 0.0;
        }
        let total: Duration = self.request_durations.iter().sum();
        total.as_secs_f64() * 1000.0 / self.request_durations.len() as f64
    }

    /// Largest duration in the ring, in milliseconds.
    pub fn max_response_ms(&self) -> u64 {
        self.request_durations
            .iter()
            .max()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Per-key hit/miss counters.
///
/// Kept outside the entry so misses on never-cached keys are counted too,
/// and so lookups never have to replace an entry just to bump a counter.
#[derive(Debug, Default)]
pub struct KeyCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl KeyCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_durations(durations: &[u64]) -> CacheEntry {
        let mut entry = CacheEntry::new(
            Bytes::from_static(b"{}"),
            vec![],
            200,
            Duration::from_secs(60),
            Duration::from_secs(30),
            Duration::from_millis(durations[0]),
            None,
        );
        for &ms in &durations[1..] {
            entry = CacheEntry::new(
                Bytes::from_static(b"{}"),
                vec![],
                200,
                Duration::from_secs(60),
                Duration::from_secs(30),
                Duration::from_millis(ms),
                Some(&entry),
            );
        }
        entry
    }

    #[test]
    fn duration_ring_is_bounded() {
        let durations: Vec<u64> = (0..40).collect();
        let entry = entry_with_durations(&durations);
        assert_eq!(entry.request_durations.len(), DURATION_RING_SIZE);
        // Oldest dropped: ring holds 15..40
        assert_eq!(
            entry.request_durations.front(),
            Some(&Duration::from_millis(15))
        );
        assert_eq!(
            entry.request_durations.back(),
            Some(&Duration::from_millis(39))
        );
    }

    #[test]
    fn avg_is_arithmetic_mean_of_window() {
        let entry = entry_with_durations(&[10, 20, 30]);
        assert!((entry.avg_response_ms() - 20.0).abs() < 1e-9);
        assert_eq!(entry.max_response_ms(), 30);
    }

    #[test]
    fn counters_start_at_zero() {
        let counters = KeyCounters::default();
        assert_eq!(counters.hits(), 0);
        assert_eq!(counters.misses(), 0);
        counters.record_hit();
        counters.record_miss();
        counters.record_miss();
        assert_eq!(counters.hits(), 1);
        assert_eq!(counters.misses(), 2);
    }
}
