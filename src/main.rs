//! statuspulse - Health Check Engine
//!
//! Periodically probes applications and components, applies
//! failure-threshold hysteresis, persists health state and publishes
//! status-change events for the incident workflow.

mod config;
mod db;
mod engine;
mod probe;
mod publisher;
mod resolver;
mod scheduler;
mod status;
mod web;

use config::EngineConfig;
use db::Store;
use engine::Engine;
use publisher::Publisher;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("statuspulse=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = EngineConfig::load();
    tracing::info!("Starting statuspulse on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    let targets = store.get_targets()?;
    tracing::info!("Database initialized with {} targets", targets.len());

    // Status-change fan-out; the incident/notification subsystem attaches
    // here. Until it does, changes are at least visible in the log.
    let publisher = Publisher::new(256);
    let mut events = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    "Forwarding status change: {}/{} {} -> {} ({})",
                    event.target_kind.as_str(),
                    event.target_id,
                    event.previous_status,
                    event.new_status,
                    event.message,
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Status-change consumer lagged, {} events dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Create and start the scheduler
    let engine = Arc::new(Engine::new(store.clone(), publisher));
    let scheduler = Arc::new(Scheduler::new(
        engine,
        store.clone(),
        cfg.workers,
        cfg.refresh_secs,
    ));
    scheduler.start().await?;

    // Start the API server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    Ok(())
}
