//! Lendwell Server - library loan tracking with overdue reminders

use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lendwell_server::{
    api,
    config::{AppConfig, EmailTransport},
    repository::PostgresLoanStore,
    services::{
        email::SmtpChannel,
        notification::{LogChannel, NotificationChannel},
        redis::RedisLedger,
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("lendwell_server={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Lendwell Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    tracing::info!("Connected to database");

    let ledger = RedisLedger::new(&config.redis.url).await?;

    tracing::info!("Connected to Redis");

    let channel: Arc<dyn NotificationChannel> = match config.email.transport {
        EmailTransport::Smtp => Arc::new(SmtpChannel::new(&config.email)?),
        EmailTransport::Log => {
            tracing::warn!("Email transport is 'log', reminders will only be logged");
            Arc::new(LogChannel)
        }
    };

    let store = Arc::new(PostgresLoanStore::new(pool));
    let (services, pending_retries) = Services::new(store, Arc::new(ledger), channel, &config);

    // Start the reminder scheduler
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = services
        .reminders
        .clone()
        .spawn(pending_retries, &config.reminders, shutdown_rx);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };
    let app = api::create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;

    shutdown_tx.send(true).ok();
    scheduler.await?;

    Ok(())
}
