// Main entry point for the interaction-processing worker

use std::sync::Arc;

use anyhow::{Context, Result};
use emberline_bus::{JetStreamBus, Publisher};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use server_core::domains::interactions::{
    ActiveUsersResponder, InteractionProcessor, PgInteractionStore,
};
use server_core::kernel::ProcessingWorker;
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Emberline interaction worker");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Connect to the bus; one client per process lifetime, flushed on the
    // shutdown path below.
    tracing::info!("Connecting to NATS at {}...", config.nats_url);
    let bus = JetStreamBus::connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")?;
    bus.ensure_topic(&config.processing_topic)
        .await
        .context("Failed to create processing topic")?;
    bus.ensure_topic(&config.notifications_topic)
        .await
        .context("Failed to create notifications topic")?;

    let subscription = bus
        .subscribe(&config.processing_topic, &config.consumer_group)
        .await
        .context("Failed to subscribe to processing topic")?;

    let store = Arc::new(PgInteractionStore::new(pool));
    let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());
    let processor = InteractionProcessor::new(
        store.clone(),
        publisher.clone(),
        config.notifications_topic.clone(),
    );
    let responder =
        ActiveUsersResponder::new(store, publisher.clone(), config.notifications_topic.clone());

    // Cooperative shutdown: ctrl-c flips the watch channel; the worker
    // finishes the in-flight message and exits its receive loop.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    ProcessingWorker::new(subscription, processor, responder)
        .run(shutdown_rx)
        .await;

    // Flush buffered publishes before exiting.
    publisher.flush().await.context("Failed to flush bus")?;
    tracing::info!("Worker exited cleanly");

    Ok(())
}
