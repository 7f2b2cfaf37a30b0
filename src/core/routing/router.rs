// src/core/routing/router.rs

//! The routing layer (C5): turns a parsed client command into one or more
//! backend requests, dispatches them on the appropriate links, and merges
//! the reply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;

use super::redirect::RedirectHandler;
use super::slot::get_slot;
use super::slot_table::SlotTable;
use crate::core::backend::{Instance, InstanceRegistry};
use crate::core::command::{CommandClass, CoalescePolicy, classify, coalesce, extract_keys};
use crate::core::errors::ProxyError;
use crate::core::protocol::RespFrame;

/// Ties together the slot table, the instance registry, and the redirection
/// handler to answer "who owns this command, and what do I send them".
#[derive(Clone)]
pub struct Router {
    slot_table: Arc<SlotTable>,
    registry: Arc<InstanceRegistry>,
    redirect: RedirectHandler,
    /// Which pool link to use for this client's requests, per
    /// `client_id % poolsize` striping.
    stripe: usize,
}

impl Router {
    pub fn new(
        slot_table: Arc<SlotTable>,
        registry: Arc<InstanceRegistry>,
        redirect: RedirectHandler,
        client_id: u64,
    ) -> Self {
        Self {
            slot_table,
            registry,
            redirect,
            stripe: client_id as usize,
        }
    }

    /// Routes and executes `name`/`args`, returning the reply to send back
    /// to the client.
    pub async fn dispatch(&self, name: &str, args: Vec<Bytes>) -> Result<RespFrame, ProxyError> {
        match classify(name) {
            CommandClass::Local => Err(ProxyError::Internal(
                "local commands must be handled by the caller, not the router".to_string(),
            )),
            CommandClass::Refused => Err(ProxyError::NotSupported(name.to_string())),
            CommandClass::Forwarded => self.dispatch_single(name, args).await,
            CommandClass::FanOut(policy) => self.dispatch_fan_out(name, args, policy).await,
        }
    }

    async fn dispatch_single(&self, name: &str, args: Vec<Bytes>) -> Result<RespFrame, ProxyError> {
        let keys = extract_keys(name, &args);
        let slot = if keys.is_empty() {
            None
        } else {
            let first = get_slot(&keys[0]);
            if keys.iter().any(|k| get_slot(k) != first) {
                return Err(ProxyError::CrossSlot);
            }
            Some(first)
        };

        let mut frame_parts = Vec::with_capacity(args.len() + 1);
        frame_parts.push(Bytes::from(name.as_bytes().to_vec()));
        frame_parts.extend(args);
        let request = RespFrame::from_command_parts(frame_parts);

        match slot {
            None => {
                // Keyless forwarded command (e.g. an unrecognized admin
                // verb): send to any known instance.
                let instance = self
                    .registry
                    .all()
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProxyError::ClusterDown("no backend instances known".to_string()))?;
                self.send_with_redirects(instance, request).await
            }
            Some(slot) => {
                let instance = self.owner_or_fatal(slot);
                self.send_with_redirects_slot(slot, instance, request).await
            }
        }
    }

    async fn dispatch_fan_out(
        &self,
        name: &str,
        args: Vec<Bytes>,
        policy: CoalescePolicy,
    ) -> Result<RespFrame, ProxyError> {
        let keys = extract_keys(name, &args);
        let total_keys = keys.len();

        // Group key positions by owning instance address.
        let mut groups: HashMap<SocketAddr, (Arc<Instance>, Vec<usize>, u16)> = HashMap::new();
        for (pos, key) in keys.iter().enumerate() {
            let slot = get_slot(key);
            let instance = self.owner_or_fatal(slot);
            groups
                .entry(instance.addr)
                .or_insert_with(|| (instance.clone(), Vec::new(), slot))
                .1
                .push(pos);
        }

        let mut key_positions = Vec::with_capacity(groups.len());
        let mut futures = Vec::with_capacity(groups.len());
        for (_, (instance, positions, slot)) in groups.into_iter() {
            let sub_args: Vec<Bytes> = build_sub_args(name, &args, &positions, policy);
            let mut frame_parts = Vec::with_capacity(sub_args.len() + 1);
            frame_parts.push(Bytes::from(name.as_bytes().to_vec()));
            frame_parts.extend(sub_args);
            let request = RespFrame::from_command_parts(frame_parts);
            key_positions.push(positions);
            futures.push(self.send_with_redirects_slot(slot, instance, request));
        }

        let replies = futures::future::join_all(futures).await;
        coalesce::merge(policy, replies, &key_positions, total_keys)
    }

    fn owner_or_fatal(&self, slot: u16) -> Arc<Instance> {
        match self.slot_table.get(slot) {
            Some(instance) => instance,
            // A null owner after the cluster has bootstrapped is a fatal
            // invariant violation, per the REDESIGN FLAGS.
            None => panic!("routing invariant violated: slot {slot} has no owner"),
        }
    }

    async fn send_with_redirects(
        &self,
        instance: Arc<Instance>,
        request: RespFrame,
    ) -> Result<RespFrame, ProxyError> {
        let link = instance.get_or_connect(self.stripe).await?;
        link.send(request).await
    }

    async fn send_with_redirects_slot(
        &self,
        slot: u16,
        instance: Arc<Instance>,
        request: RespFrame,
    ) -> Result<RespFrame, ProxyError> {
        self.redirect.send(slot, instance, request, self.stripe).await
    }
}

/// Builds the argument list for one shard's share of a fan-out command.
fn build_sub_args(
    name: &str,
    args: &[Bytes],
    positions: &[usize],
    policy: CoalescePolicy,
) -> Vec<Bytes> {
    match policy {
        CoalescePolicy::Del | CoalescePolicy::Exists | CoalescePolicy::MGet => {
            positions.iter().map(|&i| args[i].clone()).collect()
        }
        CoalescePolicy::MSet => {
            let _ = name;
            // `positions` holds key ordinals (the i-th key overall), not
            // argument indices — `MSET` packs key/value pairs two args
            // apart, so the i-th key's value lives at `args[2*i + 1]`.
            positions
                .iter()
                .flat_map(|&i| [args[2 * i].clone(), args[2 * i + 1].clone()])
                .collect()
        }
    }
}
