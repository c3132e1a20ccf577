//! `edgecache` binary: configuration from the environment, logging to stderr.

use std::sync::Arc;

use edgecache::{ProxyConfig, ProxyRouter, Server};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ProxyConfig::from_env()?;
    let router = Arc::new(ProxyRouter::new(&config)?);
    info!(
        cache = %config.cache_url,
        origin = %config.origin_url,
        max_request_bytes = config.max_request_bytes,
        max_body_bytes = config.max_body_bytes,
        probe_timeout_ms = config.probe_timeout_ms,
        "starting proxy"
    );

    let server = Server::bind(&config.listen_addr)
        .await?
        .max_request_size(config.max_request_bytes);
    server
        .run(move |req| {
            let router = Arc::clone(&router);
            async move { router.handle(req).await }
        })
        .await?;

    Ok(())
}
