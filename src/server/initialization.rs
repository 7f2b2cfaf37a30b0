// src/server/initialization.rs

//! Handles the complete server initialization process: building the
//! instance registry and slot table from configuration, bootstrapping
//! routing so the proxy is immediately operational, and binding the
//! client-facing listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

use super::context::ServerContext;
use crate::config::{self, Config};
use crate::core::backend::InstanceRegistry;
use crate::core::routing::{RedirectHandler, SlotTable};
use crate::core::state::{ProxyState, bootstrap_slot_table};

/// Backend connect timeout. Not user-configurable per `SPEC_FULL.md` §6's
/// schema — kept as a constant the way the teacher hardcodes protocol-level
/// timeouts that aren't exposed in `spineldb.conf` either.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default poolsize used for instances discovered later via `CLUSTER NODES`
/// rather than explicitly configured as a `[[cluster.routers]]` entry.
const DEFAULT_DISCOVERED_POOLSIZE: usize = 4;

pub async fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<ServerContext> {
    info!(host = %config.host, port = config.port, myid = %config.cluster.myid, "starting proxy");

    let auth_entries = config::resolve_auth(&config.cluster)?;
    let router_entries = config::resolve_routers(&config.cluster)?;
    let default_poolsize = router_entries
        .iter()
        .map(|(_, poolsize)| *poolsize)
        .max()
        .unwrap_or(DEFAULT_DISCOVERED_POOLSIZE);

    let reconnect_period = Duration::from_millis(config.cluster.reconnect_period_ms);
    let registry = Arc::new(InstanceRegistry::new(
        auth_entries,
        default_poolsize,
        CONNECT_TIMEOUT,
        reconnect_period,
    ));

    let mut instances = Vec::with_capacity(router_entries.len());
    for (addr, poolsize) in router_entries {
        instances.push(registry.register_router(addr, poolsize)?);
    }

    let slot_table = Arc::new(SlotTable::new());
    bootstrap_slot_table(&slot_table, &instances);

    let refresh_notify = Arc::new(Notify::new());
    let redirect = RedirectHandler::new(
        registry.clone(),
        slot_table.clone(),
        refresh_notify.clone(),
        config.cluster.redirect_max_limit,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let myid = config.cluster.myid.clone();

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "listening for client connections");

    let state = Arc::new(ProxyState::new(
        slot_table,
        registry,
        redirect,
        refresh_notify,
        myid,
        shutdown_tx.clone(),
        config,
        log_reload_handle,
    ));

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
