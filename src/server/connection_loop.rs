// src/server/connection_loop.rs

//! The main server loop: accepts connections and handles graceful shutdown.

use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::metrics;

/// Waits for a shutdown signal based on the operating system: SIGINT/SIGTERM
/// on Unix, Ctrl-C on Windows.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("failed to install Ctrl-C handler");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown"); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown"); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown"); } } => {},
    }
}

pub async fn run(mut ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => {
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("a background task completed"),
                    Ok(Err(e)) => { error!(error = %e, "background task failed, shutting down"); break; }
                    Err(e) => { error!(error = %e, "background task panicked, shutting down"); break; }
                }
            }

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!(%addr, "accepted connection");
                        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                        let session_id = ctx.state.next_session_id();
                        let state = ctx.state.clone();
                        let shutdown_rx = ctx.shutdown_tx.subscribe();

                        client_tasks.spawn(async move {
                            let mut handler = ConnectionHandler::new(socket, addr, state, session_id, shutdown_rx);
                            handler.run().await;
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            }

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!(error = ?e, "a client handler panicked");
                    }
                }
            }
        }
    }

    info!("shutting down, signaling all tasks");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("failed to send shutdown signal; no tasks were listening");
    }

    client_tasks.shutdown().await;
    info!("all client connections closed");

    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("timed out waiting for background tasks to finish cleanly");
    }
    info!("shutdown complete");
}
