// src/connection/session.rs

//! Per-connection state that isn't shared with the rest of the process.
//!
//! Unlike the teacher's `SessionState` (transactions, pub/sub subscriptions,
//! ACL identity), a proxy connection has almost nothing to remember between
//! commands: every command is forwarded or answered in full before the next
//! frame is read, so there is no queued/pipelined state to track across
//! awaits.

/// Holds the state specific to a single client connection.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Set by `CLIENT SETNAME`, read back by `CLIENT GETNAME`.
    pub name: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }
}
