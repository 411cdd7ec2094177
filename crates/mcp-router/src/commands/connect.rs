use crate::api::{ApiClient, CliResult};

/// Probe the gateway: `/api/info` for reachability, then an
/// authenticated call to prove the token works.
pub async fn run(client: &ApiClient) -> CliResult<()> {
    let info = client.get("/api/info").await?;
    println!(
        "gateway reachable (version {}, {} servers)",
        info["version"].as_str().unwrap_or("?"),
        info["serverCount"]
    );

    let servers = client.get("/api/servers").await?;
    let running = servers
        .as_array()
        .map(|list| {
            list.iter()
                .filter(|server| server["status"] == "running")
                .count()
        })
        .unwrap_or(0);
    println!("token accepted; {running} server(s) running");
    Ok(())
}
