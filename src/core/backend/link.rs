// src/core/backend/link.rs

//! A backend link: one TCP connection to a backend instance, owned
//! exclusively by a single `tokio` task (the "link actor"). All other code
//! interacts with a link only through its `LinkHandle`, which submits
//! requests over an unbounded channel and awaits a `oneshot` reply —
//! the re-platformed form of the original callback-FIFO contract.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::core::errors::{ProxyError, classify_redirection};
use crate::core::metrics::LINK_STATE;
use crate::core::protocol::{RespFrame, RespFrameCodec};

/// Lifecycle state of a backend link, observable by routing/pooling code
/// without holding any lock on the link actor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// A connection attempt is in flight.
    Connecting = 0,
    /// Connected and accepting requests.
    Connected = 1,
    /// The socket failed; every queued callback has been resolved with
    /// `ProxyError::LinkError` and the link will not accept new requests
    /// until it is replaced.
    Error = 2,
}

impl LinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LinkState::Connecting,
            1 => LinkState::Connected,
            _ => LinkState::Error,
        }
    }
}

struct PendingRequest {
    frame: RespFrame,
    reply: Option<oneshot::Sender<Result<RespFrame, ProxyError>>>,
}

/// A handle to a running link actor. Cheap to clone; submitting a request
/// never blocks on network I/O (the channel is unbounded, matching the
/// original's "queue a callback" semantics rather than a bounded backpressure
/// scheme).
#[derive(Clone)]
pub struct LinkHandle {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<PendingRequest>,
    state: Arc<AtomicU8>,
}

impl LinkHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_usable(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Submits `frame` for delivery on this link and returns a future that
    /// resolves with the backend's reply, or `ProxyError::LinkError` if the
    /// link fails before a reply arrives.
    pub async fn send(&self, frame: RespFrame) -> Result<RespFrame, ProxyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                frame,
                reply: Some(reply_tx),
            })
            .map_err(|_| ProxyError::LinkError(format!("link to {} has shut down", self.addr)))?;
        reply_rx
            .await
            .map_err(|_| ProxyError::LinkError(format!("link to {} dropped reply", self.addr)))?
    }

    /// Sends a fire-and-forget priming command (e.g. `ASKING`) ahead of a
    /// real request on the same link, without waiting for its reply.
    pub fn prime(&self, frame: RespFrame) -> Result<(), ProxyError> {
        self.tx
            .send(PendingRequest { frame, reply: None })
            .map_err(|_| ProxyError::LinkError(format!("link to {} has shut down", self.addr)))
    }
}

/// Connects to `addr` and spawns its actor task. Optionally primes the
/// connection with `AUTH` when `password` is set, mirroring
/// `ClusterClient::connect`'s authenticated-handshake step.
pub async fn spawn(
    addr: SocketAddr,
    pool_index: usize,
    password: Option<String>,
    connect_timeout: Duration,
) -> Result<LinkHandle, ProxyError> {
    let state = Arc::new(AtomicU8::new(LinkState::Connecting as u8));
    let slot_label = pool_index.to_string();
    LINK_STATE
        .with_label_values(&[&addr.to_string(), &slot_label])
        .set(LinkState::Connecting as u8 as f64);
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProxyError::LinkError(format!("connect to {addr} timed out")))??;
    stream.set_nodelay(true).ok();
    let mut framed = Framed::new(stream, RespFrameCodec);

    if let Some(password) = password {
        let auth = RespFrame::from_command_parts([
            Bytes::from_static(b"AUTH"),
            Bytes::from(password.into_bytes()),
        ]);
        framed
            .send(auth)
            .await
            .map_err(|e| ProxyError::LinkError(e.to_string()))?;
        match framed.next().await {
            Some(Ok(RespFrame::SimpleString(_))) => {}
            Some(Ok(RespFrame::Error(e))) => return Err(ProxyError::LinkError(e)),
            Some(Ok(_)) => {
                return Err(ProxyError::UnexpectedReplyType(
                    "AUTH reply was not a status".to_string(),
                ));
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ProxyError::LinkError(
                    "connection closed during AUTH handshake".to_string(),
                ));
            }
        }
    }

    state.store(LinkState::Connected as u8, Ordering::Release);
    LINK_STATE
        .with_label_values(&[&addr.to_string(), &slot_label])
        .set(LinkState::Connected as u8 as f64);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = LinkHandle {
        addr,
        tx,
        state: state.clone(),
    };
    tokio::spawn(run_link(addr, pool_index, framed, rx, state));
    info!(%addr, "backend link established");
    Ok(handle)
}

/// The link actor's main loop: a single task is the sole writer of the
/// socket and the sole owner of the callback FIFO, so no lock is needed to
/// maintain write-order == reply-order.
async fn run_link(
    addr: SocketAddr,
    pool_index: usize,
    mut framed: Framed<TcpStream, RespFrameCodec>,
    mut rx: mpsc::UnboundedReceiver<PendingRequest>,
    state: Arc<AtomicU8>,
) {
    let mut callbacks: VecDeque<Option<oneshot::Sender<Result<RespFrame, ProxyError>>>> =
        VecDeque::new();

    loop {
        tokio::select! {
            biased;

            maybe_req = rx.recv() => {
                let Some(req) = maybe_req else {
                    debug!(%addr, "link handle dropped, closing link");
                    break;
                };
                if let Err(e) = framed.send(req.frame).await {
                    fail_link(&state, &mut callbacks, req.reply, addr, pool_index, e.to_string());
                    break;
                }
                callbacks.push_back(req.reply);
            }

            maybe_frame = framed.next() => {
                match maybe_frame {
                    Some(Ok(frame)) => {
                        let reply = callbacks.pop_front();
                        deliver(frame, reply);
                    }
                    Some(Err(e)) => {
                        warn!(%addr, error = %e, "backend link read error");
                        fail_link(&state, &mut callbacks, None, addr, pool_index, e.to_string());
                        break;
                    }
                    None => {
                        warn!(%addr, "backend link closed by peer");
                        fail_link(
                            &state,
                            &mut callbacks,
                            None,
                            addr,
                            pool_index,
                            "connection closed by peer".to_string(),
                        );
                        break;
                    }
                }
            }
        }
    }

    state.store(LinkState::Error as u8, Ordering::Release);
    LINK_STATE
        .with_label_values(&[&addr.to_string(), &pool_index.to_string()])
        .set(LinkState::Error as u8 as f64);
}

fn deliver(frame: RespFrame, reply: Option<oneshot::Sender<Result<RespFrame, ProxyError>>>) {
    let Some(reply) = reply else { return };
    let result = match &frame {
        RespFrame::Error(msg) => match classify_redirection(msg) {
            Some(redirect) => Err(redirect),
            None => Ok(frame),
        },
        _ => Ok(frame),
    };
    let _ = reply.send(result);
}

/// Resolves every pending callback — the one just submitted (if any) and
/// everything still in the FIFO — with a single canned `LinkError`, matching
/// the original's "flush the queue with the same error on fatal failure"
/// behavior.
fn fail_link(
    state: &Arc<AtomicU8>,
    callbacks: &mut VecDeque<Option<oneshot::Sender<Result<RespFrame, ProxyError>>>>,
    extra: Option<oneshot::Sender<Result<RespFrame, ProxyError>>>,
    addr: SocketAddr,
    pool_index: usize,
    reason: String,
) {
    state.store(LinkState::Error as u8, Ordering::Release);
    LINK_STATE
        .with_label_values(&[&addr.to_string(), &pool_index.to_string()])
        .set(LinkState::Error as u8 as f64);
    let err = ProxyError::LinkError(format!("{addr}: {reason}"));
    for cb in callbacks.drain(..).chain(extra) {
        if let Some(cb) = cb {
            let _ = cb.send(Err(err.clone()));
        }
    }
}
