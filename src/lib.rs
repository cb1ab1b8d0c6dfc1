//! Heimdall - caching reverse proxy for fragile upstreams
//!
//! Heimdall sits between many HTTP clients and a single upstream service
//! that cannot tolerate high concurrency. It absorbs load through three
//! cooperating mechanisms:
//!
//! - a keyed response cache with stale-while-revalidate semantics
//!   ([`cache::CacheEngine`]),
//! - a bounded-concurrency upstream pipeline with per-URL exponential
//!   backoff ([`upstream::ConnectionManager`]),
//! - a scheduled poller keeping hot entries fresh ([`poller::PollingScheduler`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use heimdall::{Config, Proxy};
//!
//! #[tokio::main]
//! async fn main() -> heimdall::Result<()> {
//!     let config = Config::from_toml(r#"
//!         [backend]
//!         url = "http://localhost:3000"
//!
//!         [[urls]]
//!         path = "/api/status"
//!         poll_interval_secs = 30
//!         cache_ttl_secs = 60
//!         stale_time_secs = 20
//!     "#)?;
//!
//!     let proxy = Proxy::builder(config.clone()).build();
//!     proxy.start().await?;
//!
//!     let app = heimdall::server::router(proxy.clone());
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.proxy.port)).await
//!         .map_err(|e| heimdall::ProxyError::Configuration(e.to_string()))?;
//!     axum::serve(listener, app).await
//!         .map_err(|e| heimdall::ProxyError::Configuration(e.to_string()))?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod plugin;
pub mod poller;
mod proxy;
pub mod server;
pub mod stats;
pub mod telemetry;
pub mod upstream;
pub mod version;

// Re-export main types at crate root
pub use config::{Config, UrlConfig};
pub use error::{ProxyError, Result};
pub use plugin::{PluginSet, ResponsePlugin};
pub use proxy::{Proxy, ProxyBuilder};

// Re-export version info
pub use version::{version_string, GIT_BRANCH, GIT_SHA, PKG_VERSION};
