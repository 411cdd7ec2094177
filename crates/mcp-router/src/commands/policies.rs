use crate::api::{ApiClient, CliResult};
use crate::cli::{OutputFormat, PolicyCommands};
use crate::commands::print_value;

pub async fn run(client: &ApiClient, format: OutputFormat, cmd: PolicyCommands) -> CliResult<()> {
    match cmd {
        PolicyCommands::List => {
            let rules = client.get("/api/policies").await?;
            if format == OutputFormat::Json {
                print_value(format, &rules);
                return Ok(());
            }
            for rule in rules.as_array().into_iter().flatten() {
                let scope = match rule["scopeId"].as_str() {
                    Some(scope_id) => {
                        format!("{}:{scope_id}", rule["scope"].as_str().unwrap_or("?"))
                    }
                    None => rule["scope"].as_str().unwrap_or("?").to_string(),
                };
                println!(
                    "{}  [{scope}] {} {} -> {} (priority {})",
                    rule["id"].as_str().unwrap_or("?"),
                    rule["resourceType"].as_str().unwrap_or("?"),
                    rule["pattern"].as_str().unwrap_or("?"),
                    rule["action"].as_str().unwrap_or("?"),
                    rule["priority"],
                );
            }
            Ok(())
        }
    }
}
