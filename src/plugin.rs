//! Post-cache notification plugins.
//!
//! Plugins observe responses after they become visible in the cache — a
//! message-bus forwarder is the canonical example. Notification is
//! fire-and-forget: plugin errors are logged and swallowed, and a slow
//! plugin never blocks the cache path.
//!
//! Plugins may also participate in the caching decision via
//! [`ResponsePlugin::should_cache`]; any veto prevents the insert.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::Result;

/// A plugin receiving post-cache response notifications.
///
/// All methods have defaults so implementations only override what they
/// need. `on_response` receives the raw payload bytes; plugins that want
/// structure decode it themselves.
#[async_trait]
pub trait ResponsePlugin: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// One-time setup at daemon startup.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Called after a validated response is stored, with the URL path and
    /// payload. Errors are logged by the caller and otherwise ignored.
    async fn on_response(&self, _path: &str, _payload: &Bytes) -> Result<()> {
        Ok(())
    }

    /// Additional caching veto. `None` means no opinion; `Some(false)`
    /// rejects the response.
    fn should_cache(&self, _path: &str, _payload: &Bytes) -> Option<bool> {
        None
    }

    /// Called once at shutdown.
    async fn shutdown(&self) {}
}

/// An ordered set of plugins sharing one notification fan-out.
#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn ResponsePlugin>>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn ResponsePlugin>>) -> Self {
        Self { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Initialize every plugin; the first failure aborts startup.
    pub async fn initialize(&self) -> Result<()> {
        for plugin in &self.plugins {
            plugin.initialize().await?;
            debug!(plugin = plugin.name(), "plugin initialized");
        }
        Ok(())
    }

    /// Ask every plugin whether a response may be cached. Any explicit
    /// `false` wins.
    pub fn should_cache(&self, path: &str, payload: &Bytes) -> bool {
        self.plugins
            .iter()
            .all(|p| p.should_cache(path, payload).unwrap_or(true))
    }

    /// Fan a stored response out to every plugin on a detached task.
    ///
    /// Returns immediately; failures are logged per plugin.
    pub fn notify(&self, path: &str, payload: &Bytes) {
        if self.plugins.is_empty() {
            return;
        }
        let plugins = self.plugins.clone();
        let path = path.to_string();
        let payload = payload.clone();
        tokio::spawn(async move {
            for plugin in &plugins {
                if let Err(e) = plugin.on_response(&path, &payload).await {
                    warn!(plugin = plugin.name(), path, error = %e, "plugin notification failed");
                }
            }
        });
    }

    /// Shut every plugin down, in registration order.
    pub async fn shutdown(&self) {
        for plugin in &self.plugins {
            plugin.shutdown().await;
            debug!(plugin = plugin.name(), "plugin shut down");
        }
    }
}
