//! Gateway configuration: `config.toml` in the data directory plus
//! `MCPR_*` environment overrides.
//!
//! ## Layout
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 3282
//!
//! [[servers]]
//! name = "filesystem"
//! type = "stdio"
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
//!
//! [[servers]]
//! name = "deepwiki"
//! type = "http"
//! url = "https://mcp.deepwiki.com/mcp"
//! ```
//!
//! ## Environment overrides
//!
//! - `MCPR_DATA_DIR`: data directory (config, database, logs)
//! - `MCPR_HOST` / `MCPR_PORT`: bind address
//! - `MCPR_TOKEN`: default bearer for the CLI (read by the CLI, not here)

pub mod config;
pub mod paths;
pub mod server_entry;

pub use config::{RouterConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use paths::{config_path, database_path, ensure_data_dir, resolve_data_dir};
pub use server_entry::{ServerEntry, ServerTransport};
