//! Story Chat Service
//!
//! Entry point for the chat service. Serves room state, membership,
//! presence and messages over HTTP.

use anyhow::Context;
use chat_service::clock::{Clock, SystemClock};
use chat_service::config::Config;
use chat_service::observability::metrics::init_metrics_recorder;
use chat_service::rate_limit::RateLimiters;
use chat_service::repositories::{ChatStore, MemoryChatStore, PgChatStore};
use chat_service::routes::{self, AppState};
use chat_service::tasks::start_limiter_sweep;
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_service=debug,chat=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Story Chat Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        environment = ?config.environment,
        bind_address = %config.bind_address,
        presence_ttl_seconds = config.presence_ttl_seconds,
        default_room_capacity = config.default_room_capacity,
        "Configuration loaded successfully"
    );

    let store = connect_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let limiters = RateLimiters::connect(&config, clock.clone()).await;
    info!(backend = limiters.backend_name(), "Rate limiter ready");

    let cancel_token = CancellationToken::new();
    let sweep_handle = limiters.local_store().map(|local| {
        tokio::spawn(start_limiter_sweep(
            local,
            clock.clone(),
            Duration::from_secs(config.limiter_sweep_interval_seconds),
            cancel_token.clone(),
        ))
    });

    let metrics_handle = match init_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config, store, clock, limiters));
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {bind_address}"))?;

    info!("Story Chat Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel_token.cancel();
    if let Some(handle) = sweep_handle {
        if let Err(e) = handle.await {
            warn!("Limiter sweep task ended abnormally: {}", e);
        }
    }

    info!("Story Chat Service shutdown complete");

    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise the in-process store.
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn ChatStore>> {
    let Some(database_url) = &config.database_url else {
        warn!("DATABASE_URL not set, using in-memory chat store (state is lost on restart)");
        return Ok(Arc::new(MemoryChatStore::new()));
    };

    info!("Connecting to database...");
    let statement_timeout_secs = config.store_timeout_ms.div_ceil(1000);
    let url = add_query_timeout(database_url.expose_secret(), statement_timeout_secs);
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_millis(config.store_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    info!("Database connection established");
    Ok(Arc::new(PgChatStore::new(pool)))
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
