//! Scheduled polling to keep hot entries warm without client pressure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheEngine;
use crate::config::Config;
use crate::telemetry;
use crate::upstream::Upstream;

/// Drives periodic fetches for every path declared with a poll interval.
///
/// Timers are independent: a slow poll on one path never delays another
/// (the connection manager arbitrates actual dispatch concurrency).
pub struct PollingScheduler {
    engine: CacheEngine,
    upstream: Arc<dyn Upstream>,
    polled: Vec<(String, Duration)>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PollingScheduler {
    pub fn new(engine: CacheEngine, upstream: Arc<dyn Upstream>, config: &Config) -> Self {
        let polled = config
            .url_configs
            .iter()
            .filter(|u| u.is_polled())
            .map(|u| (u.path.clone(), u.poll_interval()))
            .collect();
        Self {
            engine,
            upstream,
            polled,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Paths this scheduler polls, with their intervals.
    pub fn polled_paths(&self) -> &[(String, Duration)] {
        &self.polled
    }

    /// Fetch every polled path once, in parallel, to prime the cache.
    /// Failures are logged and never fatal.
    pub async fn warm_cache(&self) {
        if self.polled.is_empty() {
            return;
        }
        info!(paths = self.polled.len(), "warming cache");
        let fetches = self.polled.iter().map(|(path, _)| {
            let engine = self.engine.clone();
            let path = path.clone();
            async move {
                if let Err(e) = engine.fetch_from_backend(&path).await {
                    warn!(%path, error = %e, "cache warm failed");
                }
            }
        });
        join_all(fetches).await;
    }

    /// Start one recurring timer per polled path.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        for (path, interval) in &self.polled {
            let engine = self.engine.clone();
            let upstream = self.upstream.clone();
            let path = path.clone();
            let period = *interval;
            // First poll is one period out; warm_cache covers startup.
            let first_tick = tokio::time::Instant::now() + period;
            handles.push(tokio::spawn(async move {
                let mut timer = tokio::time::interval_at(first_tick, period);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    timer.tick().await;
                    Self::tick(&engine, upstream.as_ref(), &path).await;
                }
            }));
        }
        info!(timers = handles.len(), "polling scheduler started");
    }

    /// One poll: skip silently while the path is in backoff, otherwise
    /// refresh through the engine (coalescing with any client fetch).
    async fn tick(engine: &CacheEngine, upstream: &dyn Upstream, path: &str) {
        if upstream.backoff_remaining(path).is_some() {
            metrics::counter!(telemetry::POLL_SKIPS_TOTAL).increment(1);
            debug!(%path, "poll skipped, path in backoff");
            return;
        }
        if let Err(e) = engine.fetch_from_backend(path).await {
            warn!(%path, error = %e, "poll failed");
        }
    }

    /// Cancel all timers. Idempotent.
    pub fn stop(&self) {
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
