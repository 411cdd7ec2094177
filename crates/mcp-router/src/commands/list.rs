use serde_json::json;

use crate::api::{ApiClient, CliResult};
use crate::cli::OutputFormat;
use crate::commands::print_value;

pub async fn run(client: &ApiClient, format: OutputFormat) -> CliResult<()> {
    let servers = client.get("/api/servers").await?;
    let tools = client.get("/api/tools").await?;

    if format == OutputFormat::Json {
        print_value(format, &json!({"servers": servers, "tools": tools}));
        return Ok(());
    }

    for server in servers.as_array().into_iter().flatten() {
        println!(
            "{}  {}  [{}]",
            server["id"].as_str().unwrap_or("?"),
            server["name"].as_str().unwrap_or("?"),
            server["status"].as_str().unwrap_or("?"),
        );
        for tool in tools.as_array().into_iter().flatten() {
            if tool["serverId"] == server["id"] {
                let marker = if tool["enabled"] == json!(false) {
                    " (disabled)"
                } else {
                    ""
                };
                println!(
                    "    {}  {}{marker}",
                    tool["exposedName"].as_str().unwrap_or("?"),
                    tool["riskLevel"].as_str().unwrap_or("?"),
                );
            }
        }
    }
    Ok(())
}
