use anyhow::Context;
use mcpr_config::{paths, RouterConfig};
use mcpr_gateway::Gateway;
use mcpr_keychain::KeyringSecretStore;
use mcpr_store::Store;
use std::sync::Arc;

use crate::api::{CliError, CliResult};

pub async fn run() -> CliResult<()> {
    let config = RouterConfig::load().map_err(CliError::from)?;

    paths::ensure_data_dir(&config.data_dir).map_err(CliError::from)?;
    let db_path = paths::database_path(&config.data_dir);
    let store = Store::open(&db_path)
        .map_err(|error| CliError::runtime(format!("failed to open database: {error}")))?;
    paths::restrict_file_mode(&db_path).map_err(CliError::from)?;

    let gateway = Gateway::new(config, store, Arc::new(KeyringSecretStore::default()))
        .map_err(|error| CliError::runtime(error.to_string()))?;

    let seeded = gateway
        .seed_configured_servers()
        .map_err(|error| CliError::runtime(error.to_string()))?;
    if seeded > 0 {
        tracing::info!(count = seeded, "seeded servers from config");
    }

    // First run: issue an admin token so the HTTP surface is reachable.
    if let Some(bootstrap) = gateway
        .ensure_bootstrap_token()
        .await
        .map_err(|error| CliError::runtime(error.to_string()))?
    {
        println!("bootstrap admin token (shown once): {}", bootstrap.id);
        println!("export MCPR_TOKEN={}", bootstrap.id);
    }

    mcpr_gateway::http::serve(gateway)
        .await
        .context("gateway stopped with an error")
        .map_err(CliError::from)
}
