// src/server/mod.rs

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    let mut server_context = initialization::setup(config, log_reload_handle).await?;
    spawner::spawn_all(&mut server_context).await?;
    connection_loop::run(server_context).await;
    Ok(())
}
