// src/connection/handler.rs

//! Defines the `ConnectionHandler`, which manages the full lifecycle of a
//! single client connection: read a RESP frame, classify it, route it, send
//! the reply, repeat until the peer disconnects or the process shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::guard::ConnectionGuard;
use super::session::SessionState;
use crate::core::command::classify;
use crate::core::errors::ProxyError;
use crate::core::local::{self, LocalOutcome};
use crate::core::metrics;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::routing::Router;
use crate::core::state::{ClientEntry, ProxyState};

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler {
    framed: Framed<TcpStream, RespFrameCodec>,
    addr: SocketAddr,
    state: Arc<ProxyState>,
    session_id: u64,
    shutdown_rx: broadcast::Receiver<()>,
    session: SessionState,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<ProxyState>,
        session_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        state.clients.insert(
            session_id,
            ClientEntry {
                addr,
                name: parking_lot::Mutex::new(None),
                created_at: Instant::now(),
            },
        );
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            framed: Framed::new(socket, RespFrameCodec),
            addr,
            state,
            session_id,
            shutdown_rx,
            session: SessionState::new(),
        }
    }

    /// The main event loop for the connection.
    pub async fn run(&mut self) {
        let _guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    let _ = self.framed.send(RespFrame::Error(
                        "SHUTDOWN the proxy is shutting down".to_string(),
                    )).await;
                    break;
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(frame)) => {
                            if !self.process_frame(frame).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            if !is_normal_disconnect(&e) {
                                warn!(addr = %self.addr, error = %e, "connection error");
                            }
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Handles one frame. Returns `false` if the connection should close.
    async fn process_frame(&mut self, frame: RespFrame) -> bool {
        let Some(parts) = frame.as_command() else {
            let _ = self
                .framed
                .send(RespFrame::Error(
                    "ERR Protocol error: expected array of bulk strings".to_string(),
                ))
                .await;
            return true;
        };
        let Some((name_bytes, args)) = parts.split_first() else {
            let _ = self
                .framed
                .send(RespFrame::Error("ERR empty command".to_string()))
                .await;
            return true;
        };
        let name = String::from_utf8_lossy(name_bytes).to_ascii_uppercase();
        let args: Vec<_> = args.iter().map(|b| (*b).clone()).collect();
        debug!(session_id = self.session_id, %name, "received command");
        let start = Instant::now();

        let outcome = if matches!(classify::classify(&name), classify::CommandClass::Local) {
            match local::dispatch(
                &self.state,
                self.session_id,
                self.addr,
                &mut self.session.name,
                &name,
                &args,
            )
            .await
            {
                LocalOutcome::Reply(reply) => {
                    let _ = self.framed.send(reply).await;
                    true
                }
                LocalOutcome::Close => false,
            }
        } else {
            let router = Router::new(
                self.state.slot_table.clone(),
                self.state.registry.clone(),
                self.state.redirect.clone(),
                self.session_id,
            );
            let reply = match router.dispatch(&name, args).await {
                Ok(reply) => {
                    metrics::COMMANDS_FORWARDED_TOTAL.inc();
                    reply
                }
                Err(ProxyError::NotSupported(cmd)) => {
                    metrics::COMMANDS_REFUSED_TOTAL.inc();
                    RespFrame::Error(ProxyError::NotSupported(cmd).to_string())
                }
                Err(e) => RespFrame::from(&e),
            };
            let _ = self.framed.send(reply).await;
            true
        };
        metrics::COMMAND_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        outcome
    }
}

/// Checks for non-critical disconnection errors that don't deserve a warning.
fn is_normal_disconnect(e: &ProxyError) -> bool {
    matches!(e, ProxyError::Io(io) if matches!(
        io.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
