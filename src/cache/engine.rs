//! The cache engine: lookup tiers, coalesced fetches, stale refresh.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::entry::{CacheEntry, KeyCounters};
use super::validation::ResponseValidator;
use crate::config::Config;
use crate::plugin::PluginSet;
use crate::stats::KeyStats;
use crate::telemetry;
use crate::upstream::Upstream;
use crate::{ProxyError, Result};

/// Capacity of the stale-refresh worker channel. A full channel drops the
/// refresh request; the next stale lookup re-triggers it.
pub const REFRESH_QUEUE_DEPTH: usize = 64;

/// A coalesced in-flight fetch. Every waiter for the same key awaits a
/// clone of the same shared future.
type SharedFetch = Shared<BoxFuture<'static, Result<Arc<CacheEntry>>>>;

/// TTL, stale-time, and slow-timeout policy resolved from configuration.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub default_ttl: Duration,
    pub default_stale_time: Duration,
    pub slow_request_timeout: Duration,
    /// Per-path overrides, keyed by exact path.
    pub per_path: HashMap<String, (Duration, Duration)>,
}

impl CachePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_ttl: config.cache.default_ttl(),
            default_stale_time: config.cache.default_stale_time(),
            slow_request_timeout: config.cache.slow_request_timeout(),
            per_path: config
                .url_configs
                .iter()
                .map(|u| (u.path.clone(), config.cache_policy(&u.path)))
                .collect(),
        }
    }

    /// (ttl, stale_time) for a path. Values are snapshotted onto entries
    /// at insertion time.
    pub fn resolve(&self, path: &str) -> (Duration, Duration) {
        self.per_path
            .get(path)
            .copied()
            .unwrap_or((self.default_ttl, self.default_stale_time))
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            default_stale_time: Duration::from_secs(30),
            slow_request_timeout: Duration::from_secs(5),
            per_path: HashMap::new(),
        }
    }
}

struct EngineInner {
    upstream: Arc<dyn Upstream>,
    entries: DashMap<String, Arc<CacheEntry>>,
    counters: DashMap<String, KeyCounters>,
    /// At most one in-flight fetch per key. A key is removed before its
    /// waiters are notified.
    pending: DashMap<String, SharedFetch>,
    /// Keys with a stale refresh already dispatched. Entry is idempotent;
    /// exit happens whatever the refresh outcome.
    refreshing: DashMap<String, ()>,
    refresh_tx: mpsc::Sender<String>,
    validator: ResponseValidator,
    plugins: PluginSet,
    policy: CachePolicy,
}

/// Keyed store of response snapshots with TTL and stale-time tiers.
///
/// Cloning is cheap; all clones share the same maps and refresh worker.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl CacheEngine {
    /// Build an engine over the given upstream, spawning the background
    /// stale-refresh worker.
    pub fn new(
        upstream: Arc<dyn Upstream>,
        policy: CachePolicy,
        validator: ResponseValidator,
        plugins: PluginSet,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE_DEPTH);
        let inner = Arc::new(EngineInner {
            upstream,
            entries: DashMap::new(),
            counters: DashMap::new(),
            pending: DashMap::new(),
            refreshing: DashMap::new(),
            refresh_tx,
            validator,
            plugins,
            policy,
        });
        tokio::spawn(Self::refresh_worker(Arc::downgrade(&inner), refresh_rx));
        Self { inner }
    }

    /// Pure cache read with hit/miss accounting.
    ///
    /// Returns the entry iff it is within TTL. A hit past the stale
    /// threshold additionally schedules one background refresh for the
    /// key, unless one is already in flight.
    pub fn lookup(&self, full_url: &str) -> Option<Arc<CacheEntry>> {
        let hit = match self.inner.entries.get(full_url) {
            Some(entry) if entry.is_valid() => Some((entry.value().clone(), entry.is_stale())),
            _ => None,
        };
        // Counter bump happens outside the entry guard.
        match hit {
            Some((entry, stale)) => {
                self.counters_for(full_url).record_hit();
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                if stale {
                    self.schedule_refresh(full_url);
                }
                Some(entry)
            }
            None => {
                self.counters_for(full_url).record_miss();
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Primary client entry point: cache hit, coalesced fetch, slow-
    /// timeout fallback, and error recovery to a prior entry.
    ///
    /// Returns the entry and whether it came from the cache. The slow
    /// timeout (defaulting to the configured value) never cancels the
    /// underlying upstream call.
    pub async fn get_or_fetch(
        &self,
        full_url: &str,
        slow_timeout: Option<Duration>,
    ) -> Result<(Arc<CacheEntry>, bool)> {
        if let Some(entry) = self.lookup(full_url) {
            return Ok((entry, true));
        }

        let fetch = self.fetch_shared(full_url);
        let slow = slow_timeout.unwrap_or(self.inner.policy.slow_request_timeout);
        let prior = self.peek(full_url);

        let outcome = if prior.is_some() {
            match tokio::time::timeout(slow, fetch).await {
                Ok(result) => result,
                // Too slow: fall back to the (possibly expired) prior
                // entry. The fetch task keeps running and will populate
                // the cache for future callers.
                Err(_) => return Ok((prior.unwrap(), true)),
            }
        } else {
            fetch.await
        };

        match outcome {
            Ok(entry) => Ok((entry, false)),
            Err(e) => match self.peek(full_url) {
                Some(prior) => Ok((prior, true)),
                None => Err(e),
            },
        }
    }

    /// Coalescing fetch: join the in-flight request for this key or
    /// start one. The returned entry has already been validated and
    /// stored.
    pub async fn fetch_from_backend(&self, full_url: &str) -> Result<Arc<CacheEntry>> {
        self.fetch_shared(full_url).await
    }

    /// Explicit insert honouring the path's TTL/stale policy. Used by
    /// tests and embedding callers; bypasses validation and plugins.
    pub fn store(&self, full_url: &str, payload: Bytes, headers: Vec<(String, String)>) {
        let (ttl, stale_time) = self.inner.policy.resolve(path_of(full_url));
        let previous = self.peek(full_url);
        let entry = CacheEntry::new(
            payload,
            headers,
            200,
            ttl,
            stale_time,
            Duration::ZERO,
            previous.as_deref(),
        );
        self.inner
            .entries
            .insert(full_url.to_string(), Arc::new(entry));
    }

    /// Wipe the entry map. Hit/miss counters and CM-owned state
    /// (backoff, error window) are deliberately untouched.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Raw map read ignoring freshness; no accounting.
    pub fn peek(&self, full_url: &str) -> Option<Arc<CacheEntry>> {
        self.inner.entries.get(full_url).map(|e| e.value().clone())
    }

    /// Per-key statistics for every key the cache has seen.
    pub fn key_stats(&self) -> HashMap<String, KeyStats> {
        let mut stats: HashMap<String, KeyStats> = HashMap::new();
        for item in self.inner.entries.iter() {
            let entry = item.value();
            stats.insert(
                item.key().clone(),
                KeyStats {
                    last_fetch_time: Some(entry.fetched_at_wall.into()),
                    payload_size: entry.payload.len(),
                    hits: 0,
                    misses: 0,
                    avg_response_ms: entry.avg_response_ms(),
                    max_response_ms: entry.max_response_ms(),
                },
            );
        }
        for item in self.inner.counters.iter() {
            let counters = item.value();
            let slot = stats.entry(item.key().clone()).or_insert(KeyStats {
                last_fetch_time: None,
                payload_size: 0,
                hits: 0,
                misses: 0,
                avg_response_ms: 0.0,
                max_response_ms: 0,
            });
            slot.hits = counters.hits();
            slot.misses = counters.misses();
        }
        stats
    }

    fn counters_for(&self, full_url: &str) -> dashmap::mapref::one::RefMut<'_, String, KeyCounters> {
        self.inner
            .counters
            .entry(full_url.to_string())
            .or_default()
    }

    /// Join or create the shared fetch for a key.
    fn fetch_shared(&self, full_url: &str) -> SharedFetch {
        if let Some(existing) = self.inner.pending.get(full_url) {
            return existing.clone();
        }

        let (tx, rx) = oneshot::channel::<Result<Arc<CacheEntry>>>();
        let shared: SharedFetch = async move {
            rx.await.map_err(|_| ProxyError::ShuttingDown)?
        }
        .boxed()
        .shared();

        // Second writer wins the race: join their fetch, drop ours.
        match self.inner.pending.entry(full_url.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => return occupied.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(shared.clone());
            }
        }

        let inner = self.inner.clone();
        let url = full_url.to_string();
        tokio::spawn(async move {
            let result = Self::do_fetch(&inner, &url).await;
            // Remove before notifying so no waiter observes a stale
            // pending slot for a settled fetch.
            inner.pending.remove(&url);
            let _ = tx.send(result);
        });

        shared
    }

    /// Dispatch through the upstream, validate, insert, notify plugins.
    async fn do_fetch(inner: &Arc<EngineInner>, full_url: &str) -> Result<Arc<CacheEntry>> {
        let response = inner.upstream.fetch(full_url).await?;
        let path = path_of(full_url);

        if let Err(reason) = inner.validator.check(path, &response.payload) {
            metrics::counter!(telemetry::VALIDATION_REJECTS_TOTAL).increment(1);
            debug!(url = full_url, %reason, "response rejected by validation");
            return Err(ProxyError::ValidationRejected {
                url: full_url.to_string(),
                reason,
            });
        }
        if !inner.plugins.should_cache(path, &response.payload) {
            metrics::counter!(telemetry::VALIDATION_REJECTS_TOTAL).increment(1);
            return Err(ProxyError::ValidationRejected {
                url: full_url.to_string(),
                reason: "rejected by plugin".to_string(),
            });
        }

        let (ttl, stale_time) = inner.policy.resolve(path);
        let previous = inner.entries.get(full_url).map(|e| e.value().clone());
        let entry = Arc::new(CacheEntry::new(
            response.payload,
            response.headers,
            response.status,
            ttl,
            stale_time,
            response.duration,
            previous.as_deref(),
        ));
        inner.entries.insert(full_url.to_string(), entry.clone());

        // Plugins see the response only once it is visible in the map.
        inner.plugins.notify(path, &entry.payload);

        Ok(entry)
    }

    /// Hand a stale key to the refresh worker, once.
    fn schedule_refresh(&self, full_url: &str) {
        match self.inner.refreshing.entry(full_url.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
            }
        }
        metrics::counter!(telemetry::STALE_REFRESHES_TOTAL).increment(1);
        if self.inner.refresh_tx.try_send(full_url.to_string()).is_err() {
            warn!(url = full_url, "stale refresh queue full, dropping request");
            self.inner.refreshing.remove(full_url);
        }
    }

    /// Background worker draining stale-refresh requests one at a time.
    /// A failed refresh leaves the current (stale but valid) entry alone.
    ///
    /// Holds only a weak handle so the worker winds down once every
    /// engine clone is gone and the sender closes.
    async fn refresh_worker(inner: Weak<EngineInner>, mut rx: mpsc::Receiver<String>) {
        while let Some(url) = rx.recv().await {
            let Some(inner) = inner.upgrade() else { break };
            let engine = CacheEngine { inner };
            if let Err(e) = engine.fetch_from_backend(&url).await {
                debug!(%url, error = %e, "stale refresh failed, keeping current entry");
            }
            engine.inner.refreshing.remove(&url);
        }
    }
}

/// The path component of a full URL (everything before `?`).
fn path_of(full_url: &str) -> &str {
    full_url.split('?').next().unwrap_or(full_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_of_strips_query() {
        assert_eq!(path_of("/a/b?x=1"), "/a/b");
        assert_eq!(path_of("/a/b"), "/a/b");
        assert_eq!(path_of("?x=1"), "");
    }

    #[test]
    fn policy_resolves_per_path_then_default() {
        let mut policy = CachePolicy::default();
        policy.per_path.insert(
            "/hot".to_string(),
            (Duration::from_secs(10), Duration::from_secs(5)),
        );
        assert_eq!(
            policy.resolve("/hot"),
            (Duration::from_secs(10), Duration::from_secs(5))
        );
        assert_eq!(
            policy.resolve("/cold"),
            (Duration::from_secs(60), Duration::from_secs(30))
        );
    }
}
