// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io::Write, sync::Arc};

use anyhow::{Context, Result};
use tokio::signal::unix;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use varbridge_rs::{
    cfg::{cli::config_path_from_invocation, config::Config, logger::init_logger},
    observer::ObserverManager,
    rpc::server::{bind, ready_line, serve},
    store::SessionStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Config: optional YAML file, env always wins.
    let cfg = match config_path_from_invocation()? {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("failed to load config {path:?}"))?,
        None => Config::from_env()?,
    };

    let _guard = init_logger(&cfg.logger)?;

    let observers = Arc::new(ObserverManager::new(cfg.watch.queue_capacity));
    let store = Arc::new(SessionStore::new(cfg.session.default_ttl, observers.clone()));

    let shutdown = CancellationToken::new();
    let ttl_sweeper = store.spawn_ttl_sweeper(cfg.session.sweep_interval, shutdown.child_token());
    let observer_sweeper =
        observers.spawn_sweeper(cfg.watch.sweep_interval, shutdown.child_token());

    // Bind before anything else so the handshake port is real.
    let listener = bind(&cfg.server.bind_address, cfg.server.port).await?;
    let port = listener.local_addr()?.port();

    // Worker handshake: exactly one unbuffered line on stdout, then
    // stdout goes quiet for good.
    {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", ready_line(port))?;
        out.flush()?;
    }

    // Gracefully exit on either SIGINT (ctrl-c) or SIGTERM: stop accepting,
    // end watch streams, flush, exit 0.
    {
        let shutdown = shutdown.clone();
        let observers = observers.clone();
        tokio::spawn(async move {
            let mut sigterm = match unix::signal(unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {e}");
                    return;
                },
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
            info!("caught signal to exit");
            observers.shutdown();
            shutdown.cancel();
        });
    }

    serve(listener, store, cfg.watch.heartbeat, shutdown.clone()).await?;

    shutdown.cancel();
    let _ = ttl_sweeper.await;
    let _ = observer_sweeper.await;
    info!("shutdown complete");
    Ok(())
}
