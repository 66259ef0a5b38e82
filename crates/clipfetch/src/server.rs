use std::net::SocketAddr;

use anyhow::{Context, Result};
use clipfetch_service::config::Config;
use clipfetch_service::metric;

use crate::endpoints;
use crate::service::RequestService;

/// Builds the services and serves the HTTP API on the configured `bind` address.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("clipfetch-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let socket = config
        .bind
        .parse::<SocketAddr>()
        .context("invalid bind address")?;

    let service = {
        let _guard = web_pool.enter();
        RequestService::create(config).context("failed to create service state")?
    };

    let server =
        axum_server::bind(socket).serve(endpoints::create_app(service).into_make_service());
    tracing::info!("Starting HTTP server on {}", socket);

    web_pool.block_on(server)?;
    tracing::info!("System shutdown complete");

    Ok(())
}
