// src/core/routing/redirect.rs

//! The redirection handler (C7): follows `MOVED`/`ASK` replies from a
//! backend until the request lands on its real owner, or the configured
//! redirect limit is exceeded.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

use super::slot_table::SlotTable;
use crate::core::backend::{Instance, InstanceRegistry};
use crate::core::errors::ProxyError;
use crate::core::metrics::REDIRECTIONS_TOTAL;
use crate::core::protocol::RespFrame;

#[derive(Clone)]
pub struct RedirectHandler {
    registry: Arc<InstanceRegistry>,
    slot_table: Arc<SlotTable>,
    /// Woken whenever a `MOVED` reply updates the slot table, so the
    /// maintenance task can fold in a full topology refresh instead of
    /// trusting a single redirect forever.
    refresh_notify: Arc<Notify>,
    max_redirects: usize,
}

impl RedirectHandler {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        slot_table: Arc<SlotTable>,
        refresh_notify: Arc<Notify>,
        max_redirects: usize,
    ) -> Self {
        Self {
            registry,
            slot_table,
            refresh_notify,
            max_redirects,
        }
    }

    /// Sends `request` (addressing `slot`) to `instance`, following at most
    /// `max_redirects` `MOVED`/`ASK` replies — exactly one forward per
    /// redirection step, per the REDESIGN FLAGS.
    pub async fn send(
        &self,
        slot: u16,
        mut instance: Arc<Instance>,
        request: RespFrame,
        stripe: usize,
    ) -> Result<RespFrame, ProxyError> {
        let mut attempts = 0usize;
        let mut asking = false;
        loop {
            let link = instance.get_or_connect(stripe).await?;
            if asking {
                link.prime(RespFrame::from_command_parts([bytes::Bytes::from_static(
                    b"ASKING",
                )]))?;
                asking = false;
            }
            match link.send(request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(ProxyError::Moved { slot: new_slot, addr }) => {
                    if attempts >= self.max_redirects {
                        return Err(ProxyError::TooManyRedirections(attempts));
                    }
                    attempts += 1;
                    let new_instance = self.registry.resolve(&addr)?;
                    debug!(slot = new_slot, %addr, "following MOVED redirection");
                    REDIRECTIONS_TOTAL.with_label_values(&["moved"]).inc();
                    self.slot_table.set(new_slot, new_instance.clone());
                    self.refresh_notify.notify_one();
                    instance = new_instance;
                }
                Err(ProxyError::Ask { slot: ask_slot, addr }) => {
                    if attempts >= self.max_redirects {
                        return Err(ProxyError::TooManyRedirections(attempts));
                    }
                    attempts += 1;
                    let new_instance = self.registry.resolve(&addr)?;
                    debug!(slot = ask_slot, %addr, "following ASK redirection");
                    REDIRECTIONS_TOTAL.with_label_values(&["ask"]).inc();
                    instance = new_instance;
                    asking = true;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_registry() -> Arc<InstanceRegistry> {
        Arc::new(InstanceRegistry::new(
            std::iter::empty(),
            1,
            Duration::from_millis(50),
            Duration::from_millis(50),
        ))
    }

    #[test]
    fn constructs_without_panicking() {
        let registry = make_registry();
        let slot_table = Arc::new(SlotTable::new());
        let notify = Arc::new(Notify::new());
        let _handler = RedirectHandler::new(registry, slot_table, notify, 3);
    }
}
