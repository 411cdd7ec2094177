use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::paths;
use crate::server_entry::{ServerEntry, ServerTransport};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3282;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const HOST_ENV: &str = "MCPR_HOST";
pub const PORT_ENV: &str = "MCPR_PORT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Binding outside loopback must be opted into explicitly.
    #[serde(default)]
    pub allow_external: bool,
    /// Browser origins allowed by CORS. Empty disallows browser callers.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_external: false,
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            servers: Vec::new(),
            data_dir: PathBuf::new(),
        }
    }
}

impl RouterConfig {
    /// Load config from the resolved data directory, applying `MCPR_HOST`
    /// and `MCPR_PORT` overrides. A missing config file yields defaults.
    pub fn load() -> Result<Self> {
        let data_dir = paths::resolve_data_dir()?;
        Self::load_from_dir(&data_dir)
    }

    pub fn load_from_dir(data_dir: &Path) -> Result<Self> {
        let path = paths::config_path(data_dir);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        } else {
            Self::default()
        };

        config.data_dir = data_dir.to_path_buf();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(HOST_ENV) {
            if !host.trim().is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var(PORT_ENV) {
            match port.parse::<u16>() {
                Ok(parsed) => self.port = parsed,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable MCPR_PORT"),
            }
        }
    }

    /// Reject configurations the gateway must not start with.
    pub fn validate(&self) -> Result<()> {
        if !self.allow_external && !is_loopback_host(&self.host) {
            bail!(
                "bind address '{}' is not loopback; set allow_external = true to permit it",
                self.host
            );
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                bail!("duplicate server name in config: '{}'", server.name);
            }
            if let ServerTransport::Stdio { command, .. } = &server.transport {
                if command.trim().is_empty() {
                    bail!("server '{}': stdio command is empty", server.name);
                }
                if which::which(command).is_err() {
                    tracing::warn!(
                        server = %server.name,
                        command = %command,
                        "stdio command not found on PATH; start will fail until installed"
                    );
                }
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
