//! The proxy facade: wires the cache engine, connection manager, and
//! polling scheduler together and exposes the narrow API the HTTP
//! front-end consumes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::cache::{CacheEngine, CacheEntry, CachePolicy, ResponseValidator};
use crate::config::Config;
use crate::plugin::{PluginSet, ResponsePlugin};
use crate::poller::PollingScheduler;
use crate::stats::{BackoffSnapshot, CacheStats, HealthStatus, QueueStats};
use crate::upstream::{ConnectionManager, ForwardRequest, UpstreamResponse};
use crate::{version, Result};

/// Builder assembling a [`Proxy`] from configuration and plugins.
///
/// ```rust,no_run
/// # use heimdall::{Config, Proxy};
/// # async fn demo(config: Config) -> heimdall::Result<()> {
/// let proxy = Proxy::builder(config).build();
/// proxy.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct ProxyBuilder {
    config: Config,
    plugins: Vec<Arc<dyn ResponsePlugin>>,
}

impl ProxyBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            plugins: Vec::new(),
        }
    }

    /// Register a post-cache notification plugin.
    pub fn plugin(mut self, plugin: Arc<dyn ResponsePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Assemble the proxy. Must run within a Tokio runtime (the cache
    /// engine spawns its stale-refresh worker here).
    pub fn build(self) -> Proxy {
        let manager = ConnectionManager::new(
            self.config.backend.url.clone(),
            self.config.backend.max_concurrent_requests,
        );
        let plugins = PluginSet::new(self.plugins);
        let engine = CacheEngine::new(
            Arc::new(manager.clone()),
            CachePolicy::from_config(&self.config),
            ResponseValidator::new(self.config.validation.clone()),
            plugins.clone(),
        );
        let scheduler = PollingScheduler::new(
            engine.clone(),
            Arc::new(manager.clone()),
            &self.config,
        );
        Proxy {
            inner: Arc::new(ProxyInner {
                engine,
                manager,
                scheduler,
                plugins,
                started_at: Instant::now(),
            }),
        }
    }
}

struct ProxyInner {
    engine: CacheEngine,
    manager: ConnectionManager,
    scheduler: PollingScheduler,
    plugins: PluginSet,
    started_at: Instant,
}

/// Handle over the assembled core. Cloning is cheap; all clones share
/// the same components.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub fn builder(config: Config) -> ProxyBuilder {
        ProxyBuilder::new(config)
    }

    /// Initialize plugins, warm the cache, and start the poll timers.
    pub async fn start(&self) -> Result<()> {
        self.inner.plugins.initialize().await?;
        self.inner.scheduler.warm_cache().await;
        self.inner.scheduler.start();
        Ok(())
    }

    /// Stop timers and shut plugins down. In-flight upstream requests
    /// drain on their own tasks.
    pub async fn shutdown(&self) {
        self.inner.scheduler.stop();
        self.inner.plugins.shutdown().await;
    }

    /// Serve a client GET: cache hit, coalesced fetch, or fallback.
    pub async fn get_or_fetch(&self, full_url: &str) -> Result<(Arc<CacheEntry>, bool)> {
        self.inner.engine.get_or_fetch(full_url, None).await
    }

    /// Forward a non-GET request upstream, uncached.
    pub async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse> {
        self.inner.manager.forward(request).await
    }

    /// Direct access to the cache engine (tests, embedding).
    pub fn engine(&self) -> &CacheEngine {
        &self.inner.engine
    }

    /// Direct access to the connection manager (tests, embedding).
    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// Empty the cache map; statistics and backoff state survive.
    pub fn clear_cache(&self) {
        self.inner.engine.clear();
    }

    /// Compose the cache-side statistics document.
    pub fn cache_stats(&self) -> CacheStats {
        let backoff = self.inner.manager.backoff();
        let now = Instant::now();
        let backoff_snapshot: HashMap<String, BackoffSnapshot> = backoff
            .snapshot()
            .into_iter()
            .map(|(url, state)| {
                (
                    url,
                    BackoffSnapshot {
                        consecutive_errors: state.consecutive_errors,
                        current_delay_ms: state.current_delay.as_millis() as u64,
                        retry_in_ms: state
                            .next_retry_at
                            .checked_duration_since(now)
                            .unwrap_or(Duration::ZERO)
                            .as_millis() as u64,
                    },
                )
            })
            .collect();
        CacheStats {
            size: self.inner.engine.len(),
            entries: self.inner.engine.key_stats(),
            error_rate: backoff.error_rate(),
            error_rate_by_path: backoff.error_rate_by_url(),
            backoff: backoff_snapshot,
        }
    }

    /// Queue-side statistics document.
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.manager.queue_stats()
    }

    /// Composed health document.
    pub fn health(&self) -> HealthStatus {
        let queue = self.inner.manager.queue_stats();
        let backoff = self.inner.manager.backoff();
        HealthStatus {
            status: "ok",
            version: version::version_string(),
            uptime_secs: self.inner.started_at.elapsed().as_secs(),
            cache_size: self.inner.engine.len(),
            queue_length: queue.queue_length,
            active_requests: queue.active_count,
            backoff_urls: backoff.snapshot().len(),
            error_rate: backoff.error_rate(),
        }
    }

    /// Insert a payload directly, honouring the path's TTL policy.
    pub fn store(&self, full_url: &str, payload: Bytes, headers: Vec<(String, String)>) {
        self.inner.engine.store(full_url, payload, headers);
    }
}
