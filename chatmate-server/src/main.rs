//! Chatmate Server
//!
//! Ingests live chat from configured streams, tracks stream metadata, and
//! keeps fixed-length moderation timeouts renewed until their expiration.

mod config;
mod sanctions;
mod server;
mod shutdown;
mod state;

use chatmate_core::clock::{Clock, MonotonicClock};
use chatmate_core::config::ConfigStore;
use chatmate_core::processors::{SanctionScheduler, StreamContext, StreamManager};
use chatmate_core::store::{EventStore, LivestreamStore, MemoryEventStore, PgEventStore};
use chatmate_core::utils::IntervalEstimator;
use chatmate_sdk::client::LiveChatClient;
use clap::Parser;
use config::{ConfigLoader, get_database_url};
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatmate - live chat ingestion and moderation service
#[derive(Parser, Debug)]
#[command(name = "chatmate-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./chatmate.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Keep everything in memory; no database is used
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHATMATE_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_json);

    tracing::info!("Starting chatmate-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    let listen_addr = loaded_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let http = reqwest::Client::builder()
        .timeout(loaded_config.client.request_timeout)
        .build()?;

    // Storage
    let db_pool = if args.dry_run {
        tracing::warn!("Dry run: events are kept in memory and sanctions are not restored");
        None
    } else {
        Some(connect_database(args.migrate).await?)
    };
    let (events, livestreams): (Arc<dyn EventStore>, Arc<dyn LivestreamStore>) = match &db_pool {
        Some(pool) => {
            let store = Arc::new(PgEventStore::new(pool.clone()));
            (store.clone() as Arc<dyn EventStore>, store as Arc<dyn LivestreamStore>)
        }
        None => {
            let store = Arc::new(MemoryEventStore::new());
            (store.clone() as Arc<dyn EventStore>, store as Arc<dyn LivestreamStore>)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Stream ingestion
    let live_chat = Arc::new(
        LiveChatClient::new(
            loaded_config.client.base_url.clone(),
            loaded_config.client.client_version.clone(),
        )
        .with_http_client(http.clone()),
    );
    let streams_store = ConfigStore::new(loaded_config.streams.clone());
    let stream_manager = StreamManager::new(StreamContext {
        transport: live_chat.clone(),
        pages: live_chat,
        events: events.clone(),
        livestreams,
        estimator: IntervalEstimator::new(loaded_config.estimator),
        clock: clock.clone(),
        metadata_refresh: loaded_config.metadata.refresh_interval,
    });
    let manager_handle = tokio::spawn(stream_manager.run(
        shutdown_rx,
        streams_store.clone(),
        streams_store.subscribe(),
    ));

    // Sanction renewal
    let scheduler = SanctionScheduler::new(clock, loaded_config.moderation.sanction_duration);
    if let Some(pool) = &db_pool {
        let restored =
            sanctions::restore_sanctions(pool, &scheduler, &loaded_config.moderation, &http)
                .await?;
        tracing::info!("{} sanctions are being renewed", restored);
    }

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(config_loader, streams_store.clone());

    let state = AppState::new(events, scheduler.clone(), streams_store);
    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_signal()).await;

    // Stop background work
    reload_notify.notify_one();
    let _ = shutdown_tx.send(true);
    scheduler.shutdown();
    if let Err(e) = manager_handle.await {
        tracing::error!("StreamManager task failed: {}", e);
    }

    if let Some(pool) = db_pool {
        tracing::info!("Closing database connections...");
        pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

async fn connect_database(migrate: bool) -> anyhow::Result<PgPool> {
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }
    Ok(db_pool)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
