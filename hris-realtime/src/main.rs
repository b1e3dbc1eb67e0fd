//! hris-realtime - real-time delivery service for the HRIS backend
//!
//! Serves the `/ws` endpoint, fans notifications out across instances
//! through the broker and resolves attendance addresses in the background.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hris_common::config::TomlConfig;
use hris_realtime::broker::{self, Broker, MemoryBroker, RedisBroker};
use hris_realtime::geocode::{
    AddressResolver, GeocodeWorker, NominatimClient, RateLimiter, SqliteAttendanceStore,
};
use hris_realtime::hub::Hub;
use hris_realtime::notification::{spawn_purge_task, NotificationService};
use hris_realtime::AppState;

/// Command-line arguments for hris-realtime
#[derive(Parser, Debug)]
#[command(name = "hris-realtime")]
#[command(about = "Real-time delivery service for HRIS")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "HRIS_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(short, long, env = "HRIS_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Redis URL for cross-instance fan-out (overrides config)
    #[arg(long, env = "HRIS_REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hris_realtime=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if args.redis_url.is_some() {
        config.broker.redis_url = args.redis_url;
    }

    info!("Starting hris-realtime v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database.path.display());

    let pool = hris_common::db::init_database(&config.database.path)
        .await
        .context("Failed to initialize database")?;

    let shutdown = CancellationToken::new();

    let broker: Arc<dyn Broker> = match &config.broker.redis_url {
        Some(url) => Arc::new(
            RedisBroker::connect(url, config.broker.channel.clone())
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            warn!("No Redis URL configured, fan-out limited to this instance");
            Arc::new(MemoryBroker::new(config.broker.delivery_buffer))
        }
    };

    let (hub, hub_task) = Hub::spawn(
        Arc::clone(&broker),
        config.broker.delivery_buffer,
        shutdown.clone(),
    );
    let listener_task = broker::spawn_listener(
        broker,
        hub.clone(),
        config.broker.reconnect_delay(),
        shutdown.clone(),
    )
    .await;
    info!("Hub and broker listener started");

    let lookup = NominatimClient::new(&config.geocode).context("Failed to build geocode client")?;
    let worker = GeocodeWorker::new(
        AddressResolver::from_config(Arc::new(lookup), &config.geocode),
        Arc::new(SqliteAttendanceStore::new(pool.clone())),
        Arc::new(RateLimiter::new(config.geocode.min_interval())),
    );
    let (geocode, geocode_task) = worker.spawn(
        config.geocode.queue_capacity,
        config.geocode.enqueue_timeout(),
        shutdown.clone(),
    );

    let notifications = NotificationService::new(pool.clone(), hub.clone());
    let purge_task = spawn_purge_task(
        notifications.clone(),
        config.notification.clone(),
        shutdown.clone(),
    );

    let state = AppState::new(
        hub,
        notifications,
        geocode,
        config.session.clone(),
        shutdown.clone(),
    );
    let sessions = state.sessions.clone();
    let app = hris_realtime::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_token.cancel();
        })
        .await
        .context("Server error")?;

    // Covers server exit without a signal
    shutdown.cancel();

    // Upgraded sessions outlive `serve`; let their writers flush and send Close
    sessions.close();
    if tokio::time::timeout(config.server.shutdown_grace(), sessions.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = sessions.len(),
            "WebSocket sessions did not finish within grace period"
        );
    }

    join_background(
        vec![
            ("hub", hub_task),
            ("broker listener", listener_task),
            ("geocode worker", geocode_task),
            ("notification purge", purge_task),
        ],
        config.server.shutdown_grace(),
    )
    .await;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for background tasks, abandoning them after `grace`
async fn join_background(tasks: Vec<(&'static str, JoinHandle<()>)>, grace: std::time::Duration) {
    let joined = tokio::time::timeout(grace, async {
        for (name, task) in tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Background task failed");
            }
        }
    })
    .await;

    if joined.is_err() {
        warn!(?grace, "Background tasks did not stop within grace period");
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
