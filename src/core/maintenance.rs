// src/core/maintenance.rs

//! The collapsed topology-maintainer / before-sleep-hook background task
//! (C8 + C9, see `SPEC_FULL.md` §2's re-platforming note): periodically, and
//! whenever a redirection handler requests it, queries a known backend
//! instance's `CLUSTER NODES` and reconciles the slot table and instance
//! registry against the result.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

use crate::core::backend::InstanceRegistry;
use crate::core::errors::ProxyError;
use crate::core::protocol::RespFrame;
use crate::core::routing::SlotTable;
use crate::core::topology::parse_cluster_nodes;

pub struct MaintenanceTask {
    registry: Arc<InstanceRegistry>,
    slot_table: Arc<SlotTable>,
    refresh_notify: Arc<Notify>,
    seed_addrs: Vec<SocketAddr>,
    tick_period: Duration,
    /// Debounces back-to-back refresh requests, following the original
    /// hook's `update_slots_min_limit`.
    min_refresh_interval: Duration,
}

impl MaintenanceTask {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        slot_table: Arc<SlotTable>,
        refresh_notify: Arc<Notify>,
        seed_addrs: Vec<SocketAddr>,
        tick_period: Duration,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            registry,
            slot_table,
            refresh_notify,
            seed_addrs,
            tick_period,
            min_refresh_interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.tick_period);
        let mut last_refresh = tokio::time::Instant::now() - self.min_refresh_interval;
        info!("topology maintenance task started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("topology maintenance task shutting down");
                    return;
                }
                _ = self.refresh_notify.notified() => {
                    if last_refresh.elapsed() < self.min_refresh_interval {
                        continue;
                    }
                    last_refresh = tokio::time::Instant::now();
                    if let Err(e) = self.refresh_once().await {
                        warn!(error = %e, "on-demand topology refresh failed");
                    }
                }
                _ = interval.tick() => {
                    last_refresh = tokio::time::Instant::now();
                    if let Err(e) = self.refresh_once().await {
                        warn!(error = %e, "periodic topology refresh failed");
                    }
                }
            }
        }
    }

    /// Queries `CLUSTER NODES` against the first reachable instance (a seed
    /// address or anything already in the registry) and reconciles the
    /// slot table and registry against the reply.
    pub async fn refresh_once(&self) -> Result<(), ProxyError> {
        let candidates: Vec<SocketAddr> = self
            .registry
            .all()
            .iter()
            .map(|i| i.addr)
            .chain(self.seed_addrs.iter().copied())
            .collect();

        let mut last_err = None;
        for addr in candidates {
            let instance = self.registry.get_or_create(addr);
            match instance.get_or_connect(0).await {
                Ok(link) => {
                    let request = RespFrame::from_command_parts([
                        Bytes::from_static(b"CLUSTER"),
                        Bytes::from_static(b"NODES"),
                    ]);
                    match link.send(request).await {
                        Ok(RespFrame::BulkString(body)) => {
                            let text = String::from_utf8_lossy(&body);
                            self.apply_topology(&text);
                            return Ok(());
                        }
                        Ok(other) => {
                            last_err = Some(ProxyError::UnexpectedReplyType(format!("{other:?}")));
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ProxyError::ClusterDown("no reachable backend instance to refresh topology from".to_string())
        }))
    }

    fn apply_topology(&self, body: &str) {
        let nodes = parse_cluster_nodes(body);
        // Only master addresses are kept: slaves own no slots (spec.md
        // §4.8 step 2 skips them) and so always have `slots_num == 0`,
        // meaning step 3's sweep must evict them rather than retain them.
        let mut live_addrs = std::collections::HashSet::new();
        let mut assignments = Vec::new();
        for node in &nodes {
            if !node.is_master {
                continue;
            }
            live_addrs.insert(node.addr);
            let instance = self.registry.get_or_create(node.addr);
            for &(start, end) in &node.slots {
                for slot in start..=end {
                    assignments.push((slot, instance.clone()));
                }
            }
        }
        if assignments.is_empty() {
            warn!("topology refresh returned no slot assignments; keeping previous table");
            return;
        }
        self.slot_table.replace_all(&assignments);
        self.registry.retain(|addr| live_addrs.contains(addr));
        debug!(
            slots_assigned = self.slot_table.slots_num(),
            instances = self.registry.len(),
            "topology refreshed"
        );
    }
}
