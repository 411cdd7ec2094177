use mcpr_config::{paths, RouterConfig};
use mcpr_store::Store;

use crate::api::{CliError, CliResult};
use crate::cli::AuditCommands;

/// Retention runs against the local database directly; it is an
/// operator task, not an API call.
pub async fn run(cmd: AuditCommands) -> CliResult<()> {
    match cmd {
        AuditCommands::Prune { older_than_days } => {
            if older_than_days < 0 {
                return Err(CliError::runtime("--older-than-days must be non-negative"));
            }
            let config = RouterConfig::load().map_err(CliError::from)?;
            let store = Store::open(&paths::database_path(&config.data_dir))
                .map_err(|error| CliError::runtime(error.to_string()))?;

            let cutoff = mcpr_core::now_ms() - older_than_days * 24 * 60 * 60 * 1_000;
            let deleted = store
                .audit()
                .delete_older_than(cutoff)
                .map_err(|error| CliError::runtime(error.to_string()))?;
            println!("deleted {deleted} audit event(s)");
            Ok(())
        }
    }
}
