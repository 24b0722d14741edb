// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Server, server::TcpIncoming};
use tracing::info;

use crate::{
    proto::v1::variable_bridge_server::VariableBridgeServer, rpc::service::BridgeService,
    store::SessionStore,
};

/// Prefix of the one-line stdout handshake a controlling parent process
/// waits for.
pub const READY_PREFIX: &str = "GRPC_READY:";

/// The handshake line, without trailing newline.
pub fn ready_line(port: u16) -> String {
    format!("{READY_PREFIX}{port}")
}

/// Bind the listening socket. Port 0 selects an ephemeral port; the bound
/// address is read back from the listener.
pub async fn bind(bind_address: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((bind_address, port))
        .await
        .with_context(|| format!("failed to bind {bind_address}:{port}"))
}

/// Serve the bridge until `shutdown` fires: stop accepting, finish
/// in-flight RPCs, return. Watch streams are ended separately by
/// cancelling the observer manager.
pub async fn serve(
    listener: TcpListener,
    store: Arc<SessionStore>,
    heartbeat: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let incoming = TcpIncoming::from_listener(listener, true, None)
        .map_err(|e| anyhow!("tcp incoming: {e}"))?;
    let service = VariableBridgeServer::new(BridgeService::new(store, heartbeat));

    info!(%addr, "variable bridge listening");
    Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(incoming, shutdown.cancelled_owned())
        .await
        .context("grpc server failed")?;
    info!("grpc server stopped");
    Ok(())
}
