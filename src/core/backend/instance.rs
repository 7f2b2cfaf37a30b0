// src/core/backend/instance.rs

//! A backend instance: one addressable Redis-Cluster-compatible shard node,
//! fronted by a small fixed-size pool of backend links.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use super::link::{self, LinkHandle, LinkState};
use crate::core::errors::ProxyError;

struct PoolSlot {
    link: Mutex<Option<LinkHandle>>,
    last_attempt: Mutex<Option<Instant>>,
}

/// One backend instance, identified by address, with `poolsize` independent
/// links. Clients are striped across the pool by `client_id % poolsize`, so
/// that a given client's requests keep arriving at the backend in the order
/// a single link guarantees, while distinct clients spread load across
/// links.
pub struct Instance {
    pub id: String,
    pub addr: SocketAddr,
    password: Option<String>,
    connect_timeout: Duration,
    reconnect_period: Duration,
    pool: Vec<PoolSlot>,
}

impl Instance {
    pub fn new(
        addr: SocketAddr,
        poolsize: usize,
        password: Option<String>,
        connect_timeout: Duration,
        reconnect_period: Duration,
    ) -> Self {
        let pool = (0..poolsize.max(1))
            .map(|_| PoolSlot {
                link: Mutex::new(None),
                last_attempt: Mutex::new(None),
            })
            .collect();
        Self {
            id: addr.to_string(),
            addr,
            password,
            connect_timeout,
            reconnect_period,
            pool,
        }
    }

    pub fn poolsize(&self) -> usize {
        self.pool.len()
    }

    /// Returns the currently usable link for `stripe`, or `None` if that
    /// slot needs (re)connecting.
    fn current(&self, stripe: usize) -> Option<LinkHandle> {
        let idx = stripe % self.pool.len();
        let slot = self.pool[idx].link.lock();
        slot.as_ref()
            .filter(|h| h.is_usable())
            .cloned()
    }

    /// Returns a usable link for `stripe`, establishing a new connection if
    /// none exists yet or the previous one has failed, subject to the
    /// per-slot reconnect throttle.
    pub async fn get_or_connect(&self, stripe: usize) -> Result<LinkHandle, ProxyError> {
        if let Some(h) = self.current(stripe) {
            return Ok(h);
        }
        let idx = stripe % self.pool.len();
        {
            let mut last = self.pool[idx].last_attempt.lock();
            if let Some(t) = *last {
                if t.elapsed() < self.reconnect_period {
                    return Err(ProxyError::LinkError(format!(
                        "{}: reconnect throttled",
                        self.addr
                    )));
                }
            }
            *last = Some(Instant::now());
        }
        let handle = link::spawn(self.addr, idx, self.password.clone(), self.connect_timeout).await?;
        *self.pool[idx].link.lock() = Some(handle.clone());
        Ok(handle)
    }

    /// Returns `true` if at least one pooled link is currently connected.
    pub fn is_reachable(&self) -> bool {
        self.pool
            .iter()
            .any(|s| matches!(s.link.lock().as_ref().map(|h| h.state()), Some(LinkState::Connected)))
    }

    pub fn mark_unreachable_if_all_failed(&self) {
        if self.pool.iter().all(|s| {
            s.link
                .lock()
                .as_ref()
                .map(|h| h.state() == LinkState::Error)
                .unwrap_or(true)
        }) {
            warn!(addr = %self.addr, "all links to backend instance are down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poolsize_is_at_least_one() {
        let inst = Instance::new(
            "127.0.0.1:7000".parse().unwrap(),
            0,
            None,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        assert_eq!(inst.poolsize(), 1);
    }
}
