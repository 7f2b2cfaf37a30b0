// src/core/state.rs

//! The single process-wide state value every connection handler and
//! background task shares, per `spec.md` §9's "Global process-wide state"
//! design note: rather than a collection of singletons, every piece of
//! routing state lives behind one `Arc<ProxyState>` handed out the way
//! `spineldb`'s `ServerState` is handed to every connection and task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, broadcast};
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;
use crate::core::backend::InstanceRegistry;
use crate::core::routing::{RedirectHandler, SlotTable};

/// Per-session bookkeeping visible to `CLIENT LIST`/`CLIENT GETNAME`. Kept
/// separate from the connection's own `SessionState` because it must be
/// reachable from other connections (admin commands) and background tasks.
pub struct ClientEntry {
    pub addr: SocketAddr,
    pub name: Mutex<Option<String>>,
    pub created_at: Instant,
}

/// Process-wide proxy state: the slot table, the instance registry, the
/// redirection handler's shared configuration, and the monotonic session
/// id counter used for `client_id mod poolsize` striping.
pub struct ProxyState {
    pub slot_table: Arc<SlotTable>,
    pub registry: Arc<InstanceRegistry>,
    pub redirect: RedirectHandler,
    /// Woken by the redirection handler after a `MOVED` reply; consumed by
    /// the topology maintainer (`core::maintenance`).
    pub refresh_notify: Arc<Notify>,
    /// This proxy instance's persistent 40-hex identifier, generated once
    /// and kept in the configuration file (`spec.md` §6's `proxy myid`).
    pub myid: String,
    /// Broadcast to every connection/background task on `SHUTDOWN` or a
    /// process signal; connections finish their in-flight command, then
    /// close without accepting new requests.
    pub shutdown_tx: broadcast::Sender<()>,
    /// Every currently connected client, keyed by session id. Backs
    /// `CLIENT LIST`/`CLIENT GETNAME`/`CLIENT SETNAME`.
    pub clients: DashMap<u64, ClientEntry>,
    /// The configuration this proxy was started with, mutated in place by
    /// `PROXY ROUTER`/`PROXY SET auth-pass` and persisted by
    /// `PROXY FLUSHCONFIG`.
    pub config: RwLock<Config>,
    /// Handle onto the live `tracing-subscriber` filter, so `CONFIG SET
    /// log_level` can change verbosity without a restart (grounded in the
    /// teacher's `ServerState::log_reload_handle`).
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    next_session_id: AtomicU64,
}

impl ProxyState {
    pub fn new(
        slot_table: Arc<SlotTable>,
        registry: Arc<InstanceRegistry>,
        redirect: RedirectHandler,
        refresh_notify: Arc<Notify>,
        myid: String,
        shutdown_tx: broadcast::Sender<()>,
        config: Config,
        log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    ) -> Self {
        Self {
            slot_table,
            registry,
            redirect,
            refresh_notify,
            myid,
            shutdown_tx,
            clients: DashMap::new(),
            config: RwLock::new(config),
            log_reload_handle,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Allocates the next monotonic session id, standing in for `spec.md`'s
    /// `client.id` (used both as a log/admin identifier and for
    /// `client_id mod poolsize` link striping).
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Picks a random known instance to pin every slot to before the first
/// `CLUSTER NODES` refresh completes, so the proxy is operational
/// immediately (`spec.md` §4.4's bootstrap rule). A no-op if no instances
/// are configured yet — the slot table stays empty and every routed
/// command will see `ProxyError::ClusterDown` until an instance is
/// registered and a refresh runs.
pub fn bootstrap_slot_table(slot_table: &SlotTable, instances: &[Arc<crate::core::backend::Instance>]) {
    use rand::Rng;
    if instances.is_empty() {
        return;
    }
    let mut rng = rand::thread_rng();
    for slot in 0..crate::core::routing::slot::NUM_SLOTS {
        let idx = rng.gen_range(0..instances.len());
        slot_table.set(slot, instances[idx].clone());
    }
}
