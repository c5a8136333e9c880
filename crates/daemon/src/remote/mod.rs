// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote session server.
//!
//! Accepts TCP connections, performs the line handshake, and either launches
//! a new WP-CLI session on a PTY or reattaches the client to a live one.
//! After the handshake the connection is a raw byte stream: PTY output flows
//! to the client (via the session log, so reattaches can catch up) and
//! client bytes flow to the PTY, with the interrupt byte and resize escape
//! handled in between.

mod handshake;
mod pty;
mod registry;
mod session;
mod tailer;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::Config;
use registry::SessionRegistry;

/// Address the session server listens on.
pub const LISTEN_ADDR: &str = "0.0.0.0:22122";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_SECS: u32 = 30;

/// Shared state for all connection handlers.
pub(crate) struct RemoteCtx {
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
    pub token: String,
}

/// Accept loop for the remote session port.
pub struct RemoteServer {
    ctx: Arc<RemoteCtx>,
}

impl RemoteServer {
    pub fn new(config: Arc<Config>, token: String) -> Self {
        Self {
            ctx: Arc::new(RemoteCtx {
                config,
                registry: SessionRegistry::new(),
                token,
            }),
        }
    }

    /// Run the accept loop, handling each connection in its own task.
    pub async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "connection accepted");
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(handle_connection(stream, ctx));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<RemoteCtx>) {
    let hs = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        handshake::read_handshake(&mut stream, &ctx.token),
    )
    .await
    {
        Ok(Ok(hs)) => hs,
        Ok(Err(e)) => {
            info!(error = %e, "handshake rejected");
            return;
        }
        Err(_) => {
            info!("handshake timed out");
            return;
        }
    };

    let stream = match enable_keepalive(stream) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "connection lost during socket setup");
            return;
        }
    };
    let (reader, mut writer) = stream.into_split();

    if let Some(live) = ctx.registry.lookup(hs.session_id.as_str()) {
        session::reattach(live, &hs, reader, writer).await;
        return;
    }

    let command = match wpr_shell::validate(&hs.command) {
        Ok(command) => command,
        Err(e) => {
            info!(session = %hs.session_id, error = %e, "command rejected");
            let _ = tokio::io::AsyncWriteExt::write_all(&mut writer, e.to_string().as_bytes()).await;
            return;
        }
    };

    session::launch(ctx, hs, command, reader, writer).await;
}

/// Keepalive probes cover clients that vanish without a FIN; a dead peer is
/// detected within a few probe intervals.
fn enable_keepalive(stream: TcpStream) -> std::io::Result<TcpStream> {
    let std_stream = stream.into_std()?;
    if let Err(e) = keepalive_opts(&std_stream) {
        warn!(error = %e, "unable to enable tcp keepalive");
    }
    TcpStream::from_std(std_stream)
}

fn keepalive_opts(stream: &std::net::TcpStream) -> nix::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};
    setsockopt(stream, sockopt::KeepAlive, &true)?;
    setsockopt(stream, sockopt::TcpKeepIdle, &KEEPALIVE_SECS)?;
    setsockopt(stream, sockopt::TcpKeepInterval, &KEEPALIVE_SECS)?;
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
