use serde_json::json;

use crate::api::{ApiClient, CliResult};
use crate::cli::{OutputFormat, TokenCommands};
use crate::commands::print_value;

pub async fn run(client: &ApiClient, format: OutputFormat, cmd: TokenCommands) -> CliResult<()> {
    match cmd {
        TokenCommands::List { client_id } => {
            let path = match client_id {
                Some(client_id) => format!("/api/tokens?clientId={client_id}"),
                None => "/api/tokens".to_string(),
            };
            let tokens = client.get(&path).await?;
            if format == OutputFormat::Json {
                print_value(format, &tokens);
                return Ok(());
            }
            for token in tokens.as_array().into_iter().flatten() {
                let expires = token["expiresAt"].as_i64().unwrap_or(0);
                let expiry = chrono::DateTime::from_timestamp(expires, 0)
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{}  client={}  name={:?}  expires={expiry}",
                    token["id"].as_str().unwrap_or("?"),
                    token["clientId"].as_str().unwrap_or("?"),
                    token["name"].as_str().unwrap_or("?"),
                );
            }
            Ok(())
        }
        TokenCommands::Create {
            client_id,
            name,
            ttl,
        } => {
            let token = client
                .post(
                    "/api/tokens",
                    &json!({
                        "clientId": client_id,
                        "name": name,
                        "ttl": ttl,
                    }),
                )
                .await?;
            if format == OutputFormat::Json {
                print_value(format, &token);
            } else {
                println!("token issued (shown once): {}", token["id"].as_str().unwrap_or("?"));
            }
            Ok(())
        }
        TokenCommands::Revoke { id } => {
            client.delete(&format!("/api/tokens/{id}")).await?;
            println!("token revoked");
            Ok(())
        }
    }
}
