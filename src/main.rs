use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidewire::config::{LoggingConfig, SlidewireConfig, StoreBackend, StoreConfig};
use slidewire::http::{ClientResolver, HttpServer};
use slidewire::ratelimit::RateLimiter;
use slidewire::store::{MemoryWindowStore, RedisWindowStore, WindowStore};

/// Distributed sliding-window rate limiter.
#[derive(Parser, Debug)]
#[command(name = "slidewire", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SlidewireConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    if args.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Slidewire Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.store.backend,
        limit = config.rate_limiting.limit,
        window_ms = config.rate_limiting.window_ms,
        consistency = ?config.rate_limiting.consistency,
        "Configuration loaded"
    );

    let store = open_store(&config.store).await?;
    let policy = config.limit_policy()?;
    let rate_limiter = Arc::new(RateLimiter::new(store, policy, config.store.key_prefix.clone())?);
    info!("Rate limiter initialized");

    let server = HttpServer::new(
        config.server.http_addr,
        rate_limiter,
        ClientResolver::from_config(&config.server),
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Slidewire Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Connect the configured window store. Startup fails if it is unreachable.
async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn WindowStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisWindowStore::connect(&config.url, config.connect_timeout()).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory window store; limits are not shared between processes");
            let store = Arc::new(MemoryWindowStore::new());
            spawn_sweeper(store.clone(), config.sweep_interval());
            Ok(store as Arc<dyn WindowStore>)
        }
    }
}

/// Periodically drop windows whose expiry has passed.
fn spawn_sweeper(store: Arc<MemoryWindowStore>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            store.purge_expired();
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
