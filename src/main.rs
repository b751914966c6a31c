use anyhow::{Context, Result};
use clap::Parser;
use release_feed::cache::ReleaseCache;
use release_feed::config::Config;
use release_feed::feed::FeedOptions;
use release_feed::fetch::Fetcher;
use release_feed::metrics::AppMetrics;
use release_feed::product::ProductRegistry;
use release_feed::scheduler::{spawn_scheduler, RefreshContext};
use release_feed::server::{run_server, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(
    name = "release-feed",
    about = "Serves an RSS feed of the latest releases for a tracked set of software products"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Any failure from here until the listener is bound is fatal: the
    // process must not start serving with an invalid configuration.
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let registry = Arc::new(
        ProductRegistry::new(config.products.clone()).context("Invalid product registry")?,
    );
    if registry.is_empty() {
        tracing::warn!("No products configured; the feed will stay empty");
    }

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", config.listen_addr))?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("release-feed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = Arc::new(
        Fetcher::new(client, Duration::from_secs(config.fetch_timeout_seconds))
            .with_github_api(config.github_api.clone())
            .with_github_token(config.github_token.clone()),
    );

    let cache = Arc::new(ReleaseCache::new(&registry));
    let metrics =
        Arc::new(AppMetrics::new(env!("CARGO_PKG_VERSION")).context("Failed to set up metrics")?);

    let scheduler = spawn_scheduler(
        RefreshContext {
            registry: Arc::clone(&registry),
            cache: Arc::clone(&cache),
            fetcher,
            metrics: Arc::clone(&metrics),
            max_concurrent_fetches: config.max_concurrent_fetches,
        },
        Duration::from_secs(config.refresh_interval_seconds),
        config.refresh_on_startup,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, products = registry.len(), "Listening");

    let state = AppState {
        cache,
        metrics,
        feed: Arc::new(FeedOptions::from(config.feed.clone())),
    };
    run_server(listener, state, shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
