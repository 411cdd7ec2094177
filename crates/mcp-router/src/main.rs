use clap::Parser;

mod api;
mod cli;
mod commands;

use api::CliError;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .ok();

    let cli = Cli::parse();
    let outcome = run(cli).await;

    if let Err(error) = outcome {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let client = api::ApiClient::new(cli.url.clone(), cli.token.clone());

    match cli.command {
        Commands::Serve => commands::serve::run().await,
        Commands::Connect => commands::connect::run(&client).await,
        Commands::Call {
            tool,
            args,
            server,
            deadline_ms,
        } => commands::call::run(&client, cli.format, &tool, &args, server.as_deref(), deadline_ms).await,
        Commands::List => commands::list::run(&client, cli.format).await,
        Commands::Search { query, limit } => {
            commands::search::run(&client, cli.format, &query, limit).await
        }
        Commands::Tokens { cmd } => commands::tokens::run(&client, cli.format, cmd).await,
        Commands::Policies { cmd } => commands::policies::run(&client, cli.format, cmd).await,
        Commands::Audit { cmd } => commands::audit::run(cmd).await,
    }
}
