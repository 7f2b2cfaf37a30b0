// src/server/spawner.rs

//! Spawns the proxy's long-running background tasks.

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use super::context::ServerContext;
use super::metrics_server;
use crate::core::maintenance::MaintenanceTask;

/// Spawns all background tasks into the provided `JoinSet`.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = ctx.state.clone();
    let shutdown_tx = ctx.shutdown_tx.clone();

    // Periodic full `CLUSTER NODES` refresh; not configurable per
    // `SPEC_FULL.md` §6's schema.
    const PERIODIC_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

    let (seed_addrs, min_refresh_interval, metrics_enabled, metrics_port) = {
        let config = state.config.read();
        (
            state.registry.all().iter().map(|i| i.addr).collect::<Vec<_>>(),
            Duration::from_millis(config.cluster.update_slots_min_limit_ms),
            config.metrics.enabled,
            config.metrics.port,
        )
    };

    let maintenance = MaintenanceTask::new(
        state.registry.clone(),
        state.slot_table.clone(),
        state.refresh_notify.clone(),
        seed_addrs,
        PERIODIC_REFRESH_INTERVAL,
        min_refresh_interval,
    );
    let shutdown_rx_maintenance = shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        maintenance.run(shutdown_rx_maintenance).await;
        Ok(())
    });

    if metrics_enabled {
        let metrics_state = state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, metrics_port, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    info!("all background tasks have been spawned");
    Ok(())
}
