// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

use crate::{
    codec,
    error::{BridgeError, Result},
    observer::dispatch,
    proto::v1 as pb,
    rpc::convert,
    store::{SessionStore, WatchOptions},
    utils::now_millis,
};

/// Outbound buffer between the dispatch task and the transport writer.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// The VariableBridge service. Request/response ops map 1:1 onto the
/// store; every recoverable failure comes back in the error arm of the
/// response union, never as a transport-level status.
pub struct BridgeService {
    store: Arc<SessionStore>,
    heartbeat: Duration,
}

impl BridgeService {
    pub fn new(store: Arc<SessionStore>, heartbeat: Duration) -> Self {
        Self { store, heartbeat }
    }
}

/// Contain a panicking handler: log it, answer `internal:`, keep serving.
async fn guarded<T, F>(op: &'static str, fut: F) -> Result<T>
where F: Future<Output = Result<T>> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!(op, "handler panicked");
            Err(BridgeError::Internal("handler panicked".to_string()))
        },
    }
}

/// Render an error for the wire, logging internals at error level.
fn wire_error(op: &'static str, err: &BridgeError) -> String {
    match err {
        BridgeError::Internal(_) => error!(op, %err, "internal error"),
        _ => debug!(op, %err, "request rejected"),
    }
    err.to_wire()
}

/// Stream-establishment failures surface as a status instead of a
/// response union.
fn status_from(err: &BridgeError) -> Status {
    match err {
        BridgeError::NotFound(_) | BridgeError::SessionNotFound(_) => {
            Status::not_found(err.to_wire())
        },
        BridgeError::SessionExpired(_) => Status::failed_precondition(err.to_wire()),
        BridgeError::AlreadyExists(_) => Status::already_exists(err.to_wire()),
        BridgeError::Internal(_) => Status::internal(err.to_wire()),
        _ => Status::invalid_argument(err.to_wire()),
    }
}

fn ttl_from_request(ttl_seconds: u64) -> Option<Duration> {
    (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds))
}

#[tonic::async_trait]
impl pb::variable_bridge_server::VariableBridge for BridgeService {
    async fn ping(
        &self,
        request: Request<pb::PingRequest>,
    ) -> std::result::Result<Response<pb::PingResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(pb::PingResponse {
            message: req.message,
            timestamp: now_millis(),
        }))
    }

    async fn initialize_session(
        &self,
        request: Request<pb::InitializeSessionRequest>,
    ) -> std::result::Result<Response<pb::InitializeSessionResponse>, Status> {
        let req = request.into_inner();
        let outcome = guarded("initialize_session", async {
            self.store
                .create_session(&req.session_id, ttl_from_request(req.ttl_seconds))
                .await
        })
        .await;
        let resp = match outcome {
            Ok(created) => pb::InitializeSessionResponse {
                result: Some(pb::initialize_session_response::Result::Session(
                    convert::session_meta_to_proto(&created.meta),
                )),
                already_existed: created.already_existed,
            },
            Err(e) => pb::InitializeSessionResponse {
                result: Some(pb::initialize_session_response::Result::Error(wire_error(
                    "initialize_session",
                    &e,
                ))),
                already_existed: false,
            },
        };
        Ok(Response::new(resp))
    }

    async fn cleanup_session(
        &self,
        request: Request<pb::CleanupSessionRequest>,
    ) -> std::result::Result<Response<pb::CleanupSessionResponse>, Status> {
        let req = request.into_inner();
        let outcome =
            guarded("cleanup_session", async { self.store.delete_session(&req.session_id) })
                .await;
        let result = match outcome {
            Ok(()) => pb::cleanup_session_response::Result::Deleted(true),
            Err(e) => {
                pb::cleanup_session_response::Result::Error(wire_error("cleanup_session", &e))
            },
        };
        Ok(Response::new(pb::CleanupSessionResponse {
            result: Some(result),
        }))
    }

    async fn get_session(
        &self,
        request: Request<pb::GetSessionRequest>,
    ) -> std::result::Result<Response<pb::GetSessionResponse>, Status> {
        let req = request.into_inner();
        let outcome =
            guarded("get_session", async { self.store.session_info(&req.session_id).await })
                .await;
        let result = match outcome {
            Ok(meta) => {
                pb::get_session_response::Result::Session(convert::session_meta_to_proto(&meta))
            },
            Err(e) => pb::get_session_response::Result::Error(wire_error("get_session", &e)),
        };
        Ok(Response::new(pb::GetSessionResponse {
            result: Some(result),
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<pb::HeartbeatRequest>,
    ) -> std::result::Result<Response<pb::HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let outcome =
            guarded("heartbeat", async { self.store.touch_session(&req.session_id) }).await;
        let result = match outcome {
            Ok(at) => pb::heartbeat_response::Result::LastActivityAt(at),
            Err(e) => pb::heartbeat_response::Result::Error(wire_error("heartbeat", &e)),
        };
        Ok(Response::new(pb::HeartbeatResponse {
            result: Some(result),
        }))
    }

    async fn register_variable(
        &self,
        request: Request<pb::RegisterVariableRequest>,
    ) -> std::result::Result<Response<pb::RegisterVariableResponse>, Status> {
        let req = request.into_inner();
        let outcome = guarded("register_variable", async {
            let vtype = convert::vartype_from_proto(req.r#type)?;
            let any = req.initial_value.as_ref().ok_or_else(|| {
                BridgeError::ValidationFailed("initial value is required".to_string())
            })?;
            let initial = codec::parse_envelope(any)?;
            let constraints = convert::constraints_from_proto(&req.constraints)?;
            self.store
                .register_variable(
                    &req.session_id,
                    &req.name,
                    vtype,
                    initial,
                    constraints,
                    convert::metadata_from_proto(&req.metadata),
                )
                .await
        })
        .await;
        let result = match outcome {
            Ok(var_id) => pb::register_variable_response::Result::VariableId(var_id),
            Err(e) => {
                pb::register_variable_response::Result::Error(wire_error("register_variable", &e))
            },
        };
        Ok(Response::new(pb::RegisterVariableResponse {
            result: Some(result),
        }))
    }

    async fn get_variable(
        &self,
        request: Request<pb::GetVariableRequest>,
    ) -> std::result::Result<Response<pb::GetVariableResponse>, Status> {
        let req = request.into_inner();
        let outcome = guarded("get_variable", async {
            let var = self
                .store
                .get_variable(&req.session_id, &req.identifier)
                .await?;
            convert::variable_to_proto(&var)
        })
        .await;
        let result = match outcome {
            Ok(var) => pb::get_variable_response::Result::Variable(var),
            Err(e) => pb::get_variable_response::Result::Error(wire_error("get_variable", &e)),
        };
        Ok(Response::new(pb::GetVariableResponse {
            result: Some(result),
        }))
    }

    async fn update_variable(
        &self,
        request: Request<pb::UpdateVariableRequest>,
    ) -> std::result::Result<Response<pb::UpdateVariableResponse>, Status> {
        let req = request.into_inner();
        let outcome = guarded("update_variable", async {
            let any = req
                .value
                .as_ref()
                .ok_or_else(|| BridgeError::ValidationFailed("value is required".to_string()))?;
            let incoming = codec::parse_envelope(any)?;
            let var = self
                .store
                .update_variable(
                    &req.session_id,
                    &req.identifier,
                    incoming,
                    convert::metadata_from_proto(&req.metadata),
                )
                .await?;
            convert::variable_to_proto(&var)
        })
        .await;
        let result = match outcome {
            Ok(var) => pb::update_variable_response::Result::Variable(var),
            Err(e) => {
                pb::update_variable_response::Result::Error(wire_error("update_variable", &e))
            },
        };
        Ok(Response::new(pb::UpdateVariableResponse {
            result: Some(result),
        }))
    }

    async fn list_variables(
        &self,
        request: Request<pb::ListVariablesRequest>,
    ) -> std::result::Result<Response<pb::ListVariablesResponse>, Status> {
        let req = request.into_inner();
        let outcome = guarded("list_variables", async {
            let pattern = (!req.pattern.is_empty()).then_some(req.pattern.as_str());
            let vars = self.store.list_variables(&req.session_id, pattern).await?;
            let mut out = Vec::with_capacity(vars.len());
            for var in &vars {
                out.push(convert::variable_to_proto(var)?);
            }
            Ok(pb::VariableList { variables: out })
        })
        .await;
        let result = match outcome {
            Ok(list) => pb::list_variables_response::Result::Variables(list),
            Err(e) => pb::list_variables_response::Result::Error(wire_error("list_variables", &e)),
        };
        Ok(Response::new(pb::ListVariablesResponse {
            result: Some(result),
        }))
    }

    async fn delete_variable(
        &self,
        request: Request<pb::DeleteVariableRequest>,
    ) -> std::result::Result<Response<pb::DeleteVariableResponse>, Status> {
        let req = request.into_inner();
        let outcome = guarded("delete_variable", async {
            self.store
                .delete_variable(&req.session_id, &req.identifier)
                .await
        })
        .await;
        let result = match outcome {
            Ok(var_id) => pb::delete_variable_response::Result::DeletedId(var_id),
            Err(e) => {
                pb::delete_variable_response::Result::Error(wire_error("delete_variable", &e))
            },
        };
        Ok(Response::new(pb::DeleteVariableResponse {
            result: Some(result),
        }))
    }

    async fn get_variables(
        &self,
        request: Request<pb::GetVariablesRequest>,
    ) -> std::result::Result<Response<pb::GetVariablesResponse>, Status> {
        let req = request.into_inner();
        let outcome = guarded("get_variables", async {
            let batch = self
                .store
                .get_variables(&req.session_id, &req.identifiers)
                .await?;
            let mut found = std::collections::HashMap::with_capacity(batch.found.len());
            for (identifier, var) in &batch.found {
                found.insert(identifier.clone(), convert::variable_to_proto(var)?);
            }
            Ok(pb::BatchGetResult {
                found,
                missing: batch.missing,
            })
        })
        .await;
        let result = match outcome {
            Ok(batch) => pb::get_variables_response::Result::BatchGetResult(batch),
            Err(e) => pb::get_variables_response::Result::Error(wire_error("get_variables", &e)),
        };
        Ok(Response::new(pb::GetVariablesResponse {
            result: Some(result),
        }))
    }

    async fn update_variables(
        &self,
        request: Request<pb::UpdateVariablesRequest>,
    ) -> std::result::Result<Response<pb::UpdateVariablesResponse>, Status> {
        let req = request.into_inner();
        let atomic = req.atomic;
        let outcome = guarded("update_variables", async {
            // Envelope parsing happens up front so a malformed entry takes
            // part in the same all-or-nothing decision as a failed
            // validation.
            let mut decoded = BTreeMap::new();
            let mut errors = BTreeMap::new();
            for (identifier, any) in &req.updates {
                match codec::parse_envelope(any) {
                    Ok(tagged) => {
                        decoded.insert(identifier.clone(), tagged);
                    },
                    Err(e) => {
                        errors.insert(identifier.clone(), e.to_wire());
                    },
                }
            }
            if atomic && !errors.is_empty() {
                return Err(BridgeError::BatchFailed { errors });
            }
            let mut batch = self
                .store
                .update_variables(
                    &req.session_id,
                    decoded,
                    atomic,
                    convert::metadata_from_proto(&req.metadata),
                )
                .await?;
            batch.errors.append(&mut errors);
            Ok(batch)
        })
        .await;
        let result = match outcome {
            Ok(batch) => pb::update_variables_response::Result::BatchUpdateResult(pb::BatchUpdateResult {
                new_versions: batch
                    .new_versions
                    .iter()
                    .map(|(k, v)| (k.clone(), *v as i32))
                    .collect(),
                errors: batch.errors.into_iter().collect(),
            }),
            // Atomic rejection reports per-key reasons; nothing was applied.
            Err(BridgeError::BatchFailed { errors }) => {
                debug!(op = "update_variables", rejected = errors.len(), "atomic batch rejected");
                pb::update_variables_response::Result::BatchUpdateResult(pb::BatchUpdateResult {
                    new_versions: std::collections::HashMap::new(),
                    errors: errors.into_iter().collect(),
                })
            },
            Err(e) => {
                pb::update_variables_response::Result::Error(wire_error("update_variables", &e))
            },
        };
        Ok(Response::new(pb::UpdateVariablesResponse {
            result: Some(result),
        }))
    }

    type WatchVariablesStream = ReceiverStream<std::result::Result<pb::VariableUpdate, Status>>;

    async fn watch_variables(
        &self,
        request: Request<pb::WatchVariablesRequest>,
    ) -> std::result::Result<Response<Self::WatchVariablesStream>, Status> {
        let req = request.into_inner();
        // Registration commits before anything is streamed; initial
        // snapshot entries are queued atomically with it.
        let (record, snapshot) = self
            .store
            .watch_variables(&req.session_id, &req.identifiers, WatchOptions {
                include_initial: req.include_initial,
                filter: None,
            })
            .await
            .map_err(|e| status_from(&e))?;
        debug!(
            session = %req.session_id,
            observer = record.id,
            watched = snapshot.len(),
            "watch stream opened"
        );

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        dispatch::spawn_stream_dispatch(
            Arc::clone(self.store.observers()),
            record,
            tx,
            self.heartbeat,
        );
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
