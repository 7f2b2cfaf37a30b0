// src/core/errors.rs

//! The primary error type for the proxy.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum. Each variant's `Display` text doubles as the RESP
/// error text sent back to a client when the error surfaces at the protocol
/// boundary.
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR {0} is not supported by this proxy")]
    NotSupported(String),

    #[error("ERR {0}")]
    Generic(String),

    #[error("ERR invalid address '{0}'")]
    InvalidAddress(String),

    #[error("ERR unexpected reply type from backend: {0}")]
    UnexpectedReplyType(String),

    /// A single-key-routed command's keys hash to more than one slot.
    #[error("CROSSSLOT Keys in request don't hash to the same slot")]
    CrossSlot,

    /// The slot addressed by a request has no known owner. `spec.md`
    /// treats this as a fatal process invariant once the cluster has
    /// bootstrapped, but clients can still observe it as a transient reply
    /// while the topology is first being discovered.
    #[error("CLUSTERDOWN {0}")]
    ClusterDown(String),

    /// Permanent redirect: the key/slot has moved to another owner.
    #[error("MOVED {slot} {addr}")]
    Moved { slot: u16, addr: String },

    /// One-shot redirect during slot migration.
    #[error("ASK {slot} {addr}")]
    Ask { slot: u16, addr: String },

    /// The canned reply delivered to every queued callback when a link
    /// enters the `Error` state (I/O failure, unexpected EOF, fatal parse
    /// error).
    #[error("ERR backend link closed: {0}")]
    LinkError(String),

    /// Raised by the redirection handler when `redirect_max_limit` is exceeded.
    #[error("ERR too many cluster redirections ({0})")]
    TooManyRedirections(usize),

    #[error("ENOENT: could not resolve address '{0}'")]
    ResolveFailed(String),

    #[error("EBUSY: instance '{0}' is already registered")]
    InstanceExists(String),

    #[error("EINVAL: {0}")]
    InvalidArgument(String),

    #[error("ERR internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for ProxyError {
    fn from(e: std::str::Utf8Error) -> Self {
        ProxyError::ProtocolError(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for ProxyError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        ProxyError::ProtocolError(e.to_string())
    }
}

impl PartialEq for ProxyError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ProxyError::Io(a), ProxyError::Io(b)) => a.to_string() == b.to_string(),
            (ProxyError::ProtocolError(a), ProxyError::ProtocolError(b)) => a == b,
            (ProxyError::WrongArgumentCount(a), ProxyError::WrongArgumentCount(b)) => a == b,
            (ProxyError::UnknownCommand(a), ProxyError::UnknownCommand(b)) => a == b,
            (ProxyError::NotSupported(a), ProxyError::NotSupported(b)) => a == b,
            (ProxyError::Generic(a), ProxyError::Generic(b)) => a == b,
            (ProxyError::InvalidAddress(a), ProxyError::InvalidAddress(b)) => a == b,
            (ProxyError::UnexpectedReplyType(a), ProxyError::UnexpectedReplyType(b)) => a == b,
            (
                ProxyError::Moved { slot: s1, addr: a1 },
                ProxyError::Moved { slot: s2, addr: a2 },
            ) => s1 == s2 && a1 == a2,
            (ProxyError::Ask { slot: s1, addr: a1 }, ProxyError::Ask { slot: s2, addr: a2 }) => {
                s1 == s2 && a1 == a2
            }
            (ProxyError::LinkError(a), ProxyError::LinkError(b)) => a == b,
            (ProxyError::TooManyRedirections(a), ProxyError::TooManyRedirections(b)) => a == b,
            (ProxyError::ResolveFailed(a), ProxyError::ResolveFailed(b)) => a == b,
            (ProxyError::InstanceExists(a), ProxyError::InstanceExists(b)) => a == b,
            (ProxyError::InvalidArgument(a), ProxyError::InvalidArgument(b)) => a == b,
            (ProxyError::Internal(a), ProxyError::Internal(b)) => a == b,
            (ProxyError::IncompleteData, ProxyError::IncompleteData) => true,
            (ProxyError::CrossSlot, ProxyError::CrossSlot) => true,
            (ProxyError::ClusterDown(a), ProxyError::ClusterDown(b)) => a == b,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

/// Parses the first token of a backend error reply to detect `MOVED`/`ASK`
/// redirections. A case-insensitive prefix match against the token, with
/// no inversion of the comparison (see REDESIGN FLAGS).
pub fn classify_redirection(message: &str) -> Option<ProxyError> {
    let mut parts = message.splitn(3, ' ');
    let tag = parts.next()?;
    if tag.eq_ignore_ascii_case("MOVED") {
        let slot: u16 = parts.next()?.parse().ok()?;
        let addr = parts.next()?.to_string();
        return Some(ProxyError::Moved { slot, addr });
    }
    if tag.eq_ignore_ascii_case("ASK") {
        let slot: u16 = parts.next()?.parse().ok()?;
        let addr = parts.next()?.to_string();
        return Some(ProxyError::Ask { slot, addr });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_moved() {
        let got = classify_redirection("MOVED 15495 127.0.0.1:7002").unwrap();
        assert_eq!(
            got,
            ProxyError::Moved {
                slot: 15495,
                addr: "127.0.0.1:7002".to_string()
            }
        );
    }

    #[test]
    fn classifies_ask_case_insensitively() {
        let got = classify_redirection("ask 8000 127.0.0.1:7003").unwrap();
        assert_eq!(
            got,
            ProxyError::Ask {
                slot: 8000,
                addr: "127.0.0.1:7003".to_string()
            }
        );
    }

    #[test]
    fn rejects_unrelated_errors() {
        assert!(classify_redirection("ERR something bad happened").is_none());
        assert!(classify_redirection("CLUSTERDOWN The cluster is down").is_none());
    }
}
