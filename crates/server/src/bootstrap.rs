use std::sync::Arc;

use signoff_core::config::{AppConfig, ConfigError, LoadOptions};
use signoff_core::workflow::{DeliveryError, InMemoryRoleDirectory};
use signoff_core::ApplicationError;
use signoff_db::{connect_with_settings, migrations, DbPool};
use signoff_engine::{NotificationOutbox, TracingAuditSink, WorkflowApi};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::delivery::channel_from_config;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: Arc<WorkflowApi>,
    /// Finishes once every handle on `api` is dropped and queued deliveries are sent.
    pub delivery_worker: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification channel could not be built: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("chain cache could not be loaded: {0}")]
    ChainCache(#[source] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let directory = Arc::new(InMemoryRoleDirectory::with_roles(config.roles.clone()));
    let channel = channel_from_config(&config.notifications)?;
    let channel_name = channel.name();
    let (outbox, delivery_worker) = NotificationOutbox::spawn(channel);

    let api = Arc::new(WorkflowApi::sqlite(
        db_pool.clone(),
        directory,
        Arc::new(TracingAuditSink),
        outbox,
    ));
    let active_chains = api.start().await.map_err(BootstrapError::ChainCache)?;
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        roles = config.roles.len(),
        active_chains,
        delivery_channel = channel_name,
        "workflow engine ready"
    );

    Ok(Application { config, db_pool, api, delivery_worker })
}
