//! Shuto API - image processing and file listing service
//!
//! Lists and serves files from rclone remotes selected by request domain.
//! Image dimensions and directory listings are kept in stale-while-revalidate
//! caches so repeated listings avoid re-downloading every image.

mod config;
mod error;
mod imaging;
mod server;
mod storage;
mod types;

use crate::error::Result;
use crate::imaging::NativeImageProcessor;
use crate::server::{start_server, ServerState, SharedState};
use crate::storage::Rclone;
use crate::types::ApiConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ApiConfig::from_env()?;

    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("shuto_api={}", config.log_level).parse()?)
        .add_directive(format!("swr_cache={}", config.log_level).parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Shuto API...");
    info!("Port: {}", config.port);
    match &config.default_remote {
        Some(remote) => info!("Default remote: {}", remote),
        None => info!("No default remote, only mapped domains are served"),
    }
    info!("Domain remotes: {}", config.domain_remotes.len());
    info!(
        "Dimensions cache: {} entries, ttl {:?}, stale after {:?}",
        config.dimensions_cache.max_size,
        config.dimensions_cache.ttl,
        config.dimensions_cache.stale_time
    );
    info!(
        "Listing cache: {} entries, ttl {:?}, stale after {:?}",
        config.listing_cache.max_size, config.listing_cache.ttl, config.listing_cache.stale_time
    );

    let storage = Rclone::new(
        config.rclone_bin.clone(),
        config.default_remote.clone(),
        config.domain_remotes.clone(),
    );

    let state: SharedState = Arc::new(ServerState::new(
        Arc::new(storage),
        Arc::new(NativeImageProcessor),
        &config,
    )?);

    // Start HTTP server (blocking)
    start_server(state, config.port).await?;

    Ok(())
}
