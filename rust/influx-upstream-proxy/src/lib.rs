pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod proxy;
pub mod query;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod translate;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the gateway using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    telemetry::init_tracing(&config.log_level);
    Server::new(config)?.run().await
}
