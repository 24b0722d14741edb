// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tonic::Status;
use tracing::{debug, warn};

use crate::{
    observer::{ObserverManager, ObserverRecord, UpdateKind},
    proto::v1::VariableUpdate,
    rpc::convert,
};

/// Per-stream dispatcher: drains one observer queue into one gRPC response
/// channel. Heartbeats fire after `heartbeat` of idle time and the timer
/// resets on every real send. Any send failure, liveness loss or session
/// expiry ends the stream and unregisters the observer.
pub async fn run_stream_dispatch(
    manager: Arc<ObserverManager>,
    record: Arc<ObserverRecord>,
    tx: mpsc::Sender<Result<VariableUpdate, Status>>,
    heartbeat: Duration,
) {
    let mut deadline = Instant::now() + heartbeat;
    loop {
        tokio::select! {
            biased;

            event = record.queue.pop(&record.cancel) => {
                let Some(event) = event else {
                    debug!(observer = record.id, "observer cancelled; closing stream");
                    break;
                };
                let terminal = event.kind == UpdateKind::SessionExpired;
                let update = match convert::update_to_proto(&event) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!(observer = record.id, "failed to encode update: {e}");
                        continue;
                    },
                };
                if tx.send(Ok(update)).await.is_err() {
                    debug!(observer = record.id, "stream receiver gone");
                    break;
                }
                deadline = Instant::now() + heartbeat;
                if terminal {
                    break;
                }
            },

            _ = tx.closed() => {
                debug!(observer = record.id, "client went away");
                break;
            },

            _ = sleep_until(deadline) => {
                if tx.send(Ok(convert::heartbeat_update())).await.is_err() {
                    break;
                }
                deadline = Instant::now() + heartbeat;
            },
        }
    }
    manager.unregister(record.id);
}

pub fn spawn_stream_dispatch(
    manager: Arc<ObserverManager>,
    record: Arc<ObserverRecord>,
    tx: mpsc::Sender<Result<VariableUpdate, Status>>,
    heartbeat: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run_stream_dispatch(manager, record, tx, heartbeat))
}
