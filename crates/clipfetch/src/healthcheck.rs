use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clipfetch_service::config::Config;

/// Checks the `/healthcheck` endpoint of a running server.
///
/// Prints `OK` or `ERROR`, and fails unless the server responded successfully.
pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;

    let addr = match addr {
        Some(addr) => addr,
        None => config.bind.parse().context("invalid bind address")?,
    };

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            println!("OK");
            Ok(())
        }
        Ok(response) => {
            println!("ERROR");
            Err(anyhow!(
                "clipfetch ({addr}) is unhealthy. Status: {}",
                response.status()
            ))
        }
        Err(error) => {
            println!("ERROR");
            Err(anyhow!("failed to check clipfetch ({addr}) health: {error}"))
        }
    }
}
