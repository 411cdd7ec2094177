pub mod audit;
pub mod call;
pub mod connect;
pub mod list;
pub mod policies;
pub mod search;
pub mod serve;
pub mod tokens;

use crate::cli::OutputFormat;
use serde_json::Value;

/// Render a JSON payload per the global `--format` flag.
pub fn print_value(format: OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Pretty => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
    }
}
