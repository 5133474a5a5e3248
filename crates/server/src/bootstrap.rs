use std::sync::Arc;

use leadflow_core::config::{AppConfig, ConfigError, LoadOptions};
use leadflow_db::{connect_with_settings, migrations, DbPool};
use leadflow_engine::LeadEngine;
use thiserror::Error;
use tracing::info;

use crate::transport::WebhookTransport;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: LeadEngine,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("webhook client could not be built: {0}")]
    Transport(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");
    config.validate()?;

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

    let transport = WebhookTransport::from_config(&config.transport, &config.delivery)
        .map_err(BootstrapError::Transport)?;
    let engine = LeadEngine::new(db_pool.clone(), &config, Arc::new(transport));

    Ok(Application { config, db_pool, engine })
}
