use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod scheduler;
pub mod service;

use crate::config::Config;
use crate::repository::checkpoint::{CheckpointStore, InMemoryCheckpointStore, PgCheckpointStore};
use crate::repository::compute::HttpComputeConnector;
use crate::repository::object_store::HttpObjectStore;
use crate::scheduler::MonitorScheduler;
use crate::service::monitor::MonitorOrchestrator;
use crate::service::signer::{ResourceUriSigner, SharedKeyCredential};
use crate::service::submission::SubmissionCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_controller=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sluice Controller...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Configuration loaded: {:?}", config);

    let checkpoints = open_checkpoint_store(&config).await?;

    // Storage collaborator
    let signer = ResourceUriSigner::new(
        config.storage_endpoint.clone(),
        SharedKeyCredential::new(
            config.storage_account_name.clone(),
            config.storage_account_key.clone(),
        ),
    );
    tracing::info!("Object store endpoint: {}", signer.endpoint());
    let store = Arc::new(HttpObjectStore::new(signer));

    // Compute collaborator
    let connector = Arc::new(HttpComputeConnector::new(
        config.batch_account_url.clone(),
        SharedKeyCredential::new(
            config.batch_account_name.clone(),
            config.batch_account_key.clone(),
        ),
        config.status_timeout,
    ));

    let submissions = Arc::new(SubmissionCoordinator::new(
        store,
        connector.clone(),
        config.submission_options(),
    ));

    let orchestrator = Arc::new(MonitorOrchestrator::new(
        connector,
        config.polling_interval,
        config.status_timeout,
    ));
    let scheduler = MonitorScheduler::new(
        Arc::clone(&checkpoints),
        orchestrator,
        config.scheduler_options(),
    );
    tokio::spawn(async move { scheduler.run().await });

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        submissions,
        checkpoints,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

async fn open_checkpoint_store(config: &Config) -> Result<Arc<dyn CheckpointStore>> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set; monitor state will not survive a restart");
        return Ok(Arc::new(InMemoryCheckpointStore::new()));
    };

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(Arc::new(PgCheckpointStore::new(pool)))
}
