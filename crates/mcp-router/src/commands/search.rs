use crate::api::{ApiClient, CliResult};
use crate::cli::OutputFormat;
use crate::commands::print_value;

pub async fn run(
    client: &ApiClient,
    format: OutputFormat,
    query: &str,
    limit: Option<usize>,
) -> CliResult<()> {
    let mut path = format!("/api/tools/search?q={}", urlencode(query));
    if let Some(limit) = limit {
        path.push_str(&format!("&limit={limit}"));
    }
    let hits = client.get(&path).await?;

    if format == OutputFormat::Json {
        print_value(format, &hits);
        return Ok(());
    }

    for hit in hits.as_array().into_iter().flatten() {
        println!(
            "{:8.3}  {}  {}",
            hit["score"].as_f64().unwrap_or(0.0),
            hit["tool"]["exposedName"].as_str().unwrap_or("?"),
            hit["tool"]["description"].as_str().unwrap_or(""),
        );
    }
    Ok(())
}

fn urlencode(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~') {
                ch.to_string()
            } else {
                ch.to_string()
                    .bytes()
                    .map(|byte| format!("%{byte:02X}"))
                    .collect()
            }
        })
        .collect()
}
