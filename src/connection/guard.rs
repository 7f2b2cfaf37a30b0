// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::core::metrics;
use crate::core::state::ProxyState;

/// An RAII guard that removes a connection's bookkeeping entries when its
/// handler task exits, however it exits (normal close, error, panic).
pub struct ConnectionGuard {
    state: Arc<ProxyState>,
    session_id: u64,
    addr: SocketAddr,
}

impl ConnectionGuard {
    pub fn new(state: Arc<ProxyState>, session_id: u64, addr: SocketAddr) -> Self {
        Self {
            state,
            session_id,
            addr,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        self.state.clients.remove(&self.session_id);
        debug!(session_id = self.session_id, addr = %self.addr, "connection closed");
    }
}
