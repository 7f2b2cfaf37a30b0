// src/core/backend/registry.rs

//! Tracks every backend instance the proxy currently knows about, keyed by
//! address. New instances are created lazily: the first time a `MOVED`/`ASK`
//! redirection or a `CLUSTER NODES` refresh names an address not yet seen.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use super::instance::Instance;
use crate::core::errors::ProxyError;

pub struct InstanceRegistry {
    instances: DashMap<SocketAddr, Arc<Instance>>,
    /// Per-address authentication secrets. A `DashMap` rather than a plain
    /// map so `PROXY SET auth-pass` can update it for instances created
    /// after the change without taking the registry by `&mut self`.
    auth: DashMap<SocketAddr, String>,
    poolsize: usize,
    connect_timeout: Duration,
    reconnect_period: Duration,
}

impl InstanceRegistry {
    pub fn new(
        auth: impl IntoIterator<Item = (SocketAddr, String)>,
        poolsize: usize,
        connect_timeout: Duration,
        reconnect_period: Duration,
    ) -> Self {
        Self {
            instances: DashMap::new(),
            auth: auth.into_iter().collect(),
            poolsize,
            connect_timeout,
            reconnect_period,
        }
    }

    /// Returns the instance for `addr`, creating it (with no connections
    /// established yet — links are opened lazily on first use) if this is
    /// the first time this address has been seen. Uses the registry's
    /// default poolsize.
    pub fn get_or_create(&self, addr: SocketAddr) -> Arc<Instance> {
        self.get_or_create_with_poolsize(addr, self.poolsize)
    }

    fn get_or_create_with_poolsize(&self, addr: SocketAddr, poolsize: usize) -> Arc<Instance> {
        if let Some(existing) = self.instances.get(&addr) {
            return existing.clone();
        }
        let password = self.auth.get(&addr).map(|e| e.value().clone());
        let instance = Arc::new(Instance::new(
            addr,
            poolsize,
            password,
            self.connect_timeout,
            self.reconnect_period,
        ));
        self.instances.insert(addr, instance.clone());
        info!(%addr, poolsize, "registered new backend instance");
        instance
    }

    /// Explicitly registers a router instance (the `PROXY ROUTER` admin
    /// sub-command and startup bootstrap), applying the creation-failure
    /// taxonomy from `spec.md` §4.3: duplicate address is `EBUSY`, a
    /// non-positive poolsize is `EINVAL`.
    pub fn register_router(
        &self,
        addr: SocketAddr,
        poolsize: usize,
    ) -> Result<Arc<Instance>, ProxyError> {
        if poolsize == 0 {
            return Err(ProxyError::InvalidArgument(
                "poolsize must be positive".to_string(),
            ));
        }
        if self.instances.contains_key(&addr) {
            return Err(ProxyError::InstanceExists(addr.to_string()));
        }
        Ok(self.get_or_create_with_poolsize(addr, poolsize))
    }

    /// Updates (or sets) the authentication secret used for future
    /// connections to `addr`. Does not retroactively re-authenticate links
    /// already established under the old password.
    pub fn set_auth(&self, addr: SocketAddr, password: String) {
        self.auth.insert(addr, password);
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<Instance>> {
        self.instances.get(addr).map(|e| e.clone())
    }

    pub fn resolve(&self, host_port: &str) -> Result<Arc<Instance>, ProxyError> {
        let addr: SocketAddr = host_port
            .parse()
            .map_err(|_| ProxyError::ResolveFailed(host_port.to_string()))?;
        Ok(self.get_or_create(addr))
    }

    pub fn all(&self) -> Vec<Arc<Instance>> {
        self.instances.iter().map(|e| e.value().clone()).collect()
    }

    /// Returns every configured `(addr, password)` pair, used to rebuild the
    /// `[[cluster.auth]]` section of the configuration file on
    /// `PROXY FLUSHCONFIG`.
    pub fn auth_entries(&self) -> Vec<(SocketAddr, String)> {
        self.auth
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Returns each registered instance's `(addr, poolsize)`, used to rebuild
    /// the `[[cluster.routers]]` section of the configuration file.
    pub fn router_entries(&self) -> Vec<(SocketAddr, usize)> {
        self.instances
            .iter()
            .map(|e| (*e.key(), e.value().poolsize()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Drops instances no longer referenced by the slot table, called from
    /// the maintenance task after a topology refresh.
    pub fn retain(&self, keep: impl Fn(&SocketAddr) -> bool) {
        self.instances.retain(|addr, _| keep(addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = InstanceRegistry::new(
            std::iter::empty(),
            2,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let a = registry.get_or_create(addr);
        let b = registry.get_or_create(addr);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_router_rejects_duplicate_address() {
        let registry = InstanceRegistry::new(
            std::iter::empty(),
            1,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        let addr: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        assert!(registry.register_router(addr, 4).is_ok());
        assert!(matches!(
            registry.register_router(addr, 4),
            Err(ProxyError::InstanceExists(_))
        ));
    }

    #[test]
    fn register_router_rejects_zero_poolsize() {
        let registry = InstanceRegistry::new(
            std::iter::empty(),
            1,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        let addr: SocketAddr = "127.0.0.1:7002".parse().unwrap();
        assert!(matches!(
            registry.register_router(addr, 0),
            Err(ProxyError::InvalidArgument(_))
        ));
    }
}
