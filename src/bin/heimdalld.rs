//! heimdalld — Heimdall daemon.
//!
//! Serves the caching proxy over HTTP: cached GETs, pass-through for
//! other methods, and the statistics endpoints.

use std::net::SocketAddr;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heimdall::server;
use heimdall::{Config, Proxy};

/// Heimdall caching reverse-proxy daemon.
#[derive(Parser)]
#[command(name = "heimdalld")]
#[command(version = heimdall::PKG_VERSION)]
#[command(about = "Caching reverse proxy for fragile upstreams")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    let default_filter = if config.proxy.debug {
        "heimdall=debug,heimdalld=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.proxy.port));
    info!(
        version = heimdall::version_string(),
        backend = %config.backend.url,
        %addr,
        "heimdalld starting"
    );

    let proxy = Proxy::builder(config).build();
    proxy.start().await?;

    let app = server::router(proxy.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    proxy.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
