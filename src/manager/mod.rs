//! The manager process: accept loop, registries, buffered-send workers, HTTP introspection,
//! and signal-driven diagnostics.

pub mod channel;
pub mod connection;
pub mod dump;
pub mod http;
pub mod notify;
pub mod registry;
pub mod state;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ManagerConfig;
use crate::error::Result;
use state::ManagerState;

/// A running manager instance: the control link's accept loop plus its HTTP and SIGUSR1-dump
/// companion tasks. Returned by [`spawn`] so callers (the binary's `run`, or a test harness
/// bringing up a manager on an ephemeral port) can learn the bound address and tear everything
/// down without going through a real SIGINT.
pub struct ManagerHandle {
    pub local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    http_task: JoinHandle<()>,
    dump_task: JoinHandle<()>,
}

impl ManagerHandle {
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.http_task.abort();
        self.dump_task.abort();
    }
}

/// Binds the control port and spawns the accept loop, HTTP introspection server, and
/// SIGUSR1-triggered registry dump, returning immediately with a [`ManagerHandle`]. A bind
/// failure here is the one startup-time condition that is fatal rather than logged and
/// shrugged off.
pub async fn spawn(config: ManagerConfig) -> Result<ManagerHandle> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "control link listening");

    let state = ManagerState::new();

    let http_task = tokio::spawn(http::run(state.clone(), config.host.clone(), config.http_port));

    let accept_state = state.clone();
    let accept_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let state = accept_state.clone();
                    tokio::spawn(connection::handle_connection(state, stream, peer_addr));
                },
                Err(err) => {
                    error!(error = %err, "accept failed");
                },
            }
        }
    });

    let dump_state = state.clone();
    let dump_task = tokio::spawn(async move {
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install SIGUSR1 handler");
                return;
            },
        };
        loop {
            usr1.recv().await;
            dump::dump_registries(&dump_state).await;
        }
    });

    Ok(ManagerHandle {
        local_addr,
        accept_task,
        http_task,
        dump_task,
    })
}

/// Runs the manager until SIGINT.
pub async fn run(config: ManagerConfig) -> Result<()> {
    let handle = spawn(config).await?;
    let mut sigint = signal(SignalKind::interrupt())?;
    sigint.recv().await;
    info!("SIGINT received, tearing down");
    handle.shutdown();
    Ok(())
}
