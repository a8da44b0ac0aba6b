pub mod cli;
pub mod core;
pub mod providers;

use crate::core::config::AppConfig;
use crate::core::{RefreshScheduler, SnapshotStore};
use crate::providers::AwesomeApiProvider;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Show,
    Watch,
}

/// Wires the upstream provider, an empty store and the scheduler for one session.
pub fn build_scheduler(config: &AppConfig) -> RefreshScheduler {
    let provider = Arc::new(AwesomeApiProvider::new(
        &config.providers.awesome_api.base_url,
        &config.base_currency,
        config.request_timeout(),
    ));

    RefreshScheduler::new(
        provider.clone(),
        provider,
        SnapshotStore::new(),
        config.symbols.clone(),
        config.history_window_days,
        config.refresh_interval(),
    )
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fxwatch starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let scheduler = build_scheduler(&config);

    match command {
        AppCommand::Show => cli::show::run(&scheduler, &config).await,
        AppCommand::Watch => cli::watch::run(&scheduler, &config).await,
    }
}
