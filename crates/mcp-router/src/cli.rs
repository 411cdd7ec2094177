use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Parser)]
#[command(name = "mcp-router", version)]
#[command(about = "MCP Router: one authenticated gateway for many MCP tool-servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Gateway base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:3282")]
    pub url: String,

    /// Bearer token (falls back to MCPR_TOKEN)
    #[arg(long, global = true, env = "MCPR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "pretty")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway in the foreground
    Serve,

    /// Check connectivity and token validity against a running gateway
    Connect,

    /// Call a tool by exposed name (serverslug__toolname)
    Call {
        /// Exposed tool name, or the raw name when --server is given
        tool: String,

        /// JSON arguments object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Server id; routes the raw tool name through that server
        #[arg(long)]
        server: Option<String>,

        /// Per-call deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// List servers and their tools
    List,

    /// Search the tool catalog
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage bearer tokens
    Tokens {
        #[command(subcommand)]
        cmd: TokenCommands,
    },

    /// Manage policy rules
    Policies {
        #[command(subcommand)]
        cmd: PolicyCommands,
    },

    /// Audit log maintenance (operates on the local data directory)
    Audit {
        #[command(subcommand)]
        cmd: AuditCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// List token metadata
    List {
        #[arg(long)]
        client_id: Option<String>,
    },

    /// Issue a new token (prints the secret exactly once)
    Create {
        #[arg(long)]
        client_id: String,

        #[arg(long)]
        name: String,

        /// Lifetime in seconds (default 1 day, capped at 30 days)
        #[arg(long)]
        ttl: Option<i64>,
    },

    /// Revoke a token by id
    Revoke { id: String },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// List policy rules
    List,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Delete audit rows older than the given number of days
    Prune {
        #[arg(long)]
        older_than_days: i64,
    },
}
