use serde_json::{json, Value};

use crate::api::{ApiClient, CliError, CliResult};
use crate::cli::OutputFormat;
use crate::commands::print_value;

pub async fn run(
    client: &ApiClient,
    format: OutputFormat,
    tool: &str,
    args: &str,
    server: Option<&str>,
    deadline_ms: Option<u64>,
) -> CliResult<()> {
    let arguments: Value = serde_json::from_str(args)
        .map_err(|error| CliError::runtime(format!("--args is not valid JSON: {error}")))?;
    if !arguments.is_object() {
        return Err(CliError::runtime("--args must be a JSON object"));
    }

    let path = match server {
        Some(server_id) => format!("/api/servers/{server_id}/tools/{tool}/call"),
        None => format!("/api/tools/{tool}/call"),
    };

    let response = client
        .post_with_deadline(&path, &json!({ "arguments": arguments }), deadline_ms)
        .await?;

    match format {
        OutputFormat::Json => print_value(format, &response),
        OutputFormat::Pretty => {
            if response["isError"] == json!(true) {
                eprintln!("tool reported an error:");
            }
            // Text content prints as text; anything else as pretty JSON.
            match response["content"].as_array() {
                Some(parts) => {
                    for part in parts {
                        match part["text"].as_str() {
                            Some(text) => println!("{text}"),
                            None => print_value(format, part),
                        }
                    }
                }
                None => print_value(format, &response["content"]),
            }
        }
    }
    Ok(())
}
