// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use varbridge_rs::{
    codec::encode_value,
    observer::ObserverManager,
    proto::v1 as pb,
    proto::v1::variable_bridge_client::VariableBridgeClient,
    rpc::server::{bind, serve},
    store::SessionStore,
    types::Value,
};

/// An in-process bridge on an ephemeral port, with direct store access for
/// server-side assertions.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<SessionStore>,
    pub observers: Arc<ObserverManager>,
    pub shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn stop(self) -> Result<()> {
        self.observers.shutdown();
        self.shutdown.cancel();
        self.handle.await??;
        Ok(())
    }
}

pub async fn spawn_server() -> Result<TestServer> {
    spawn_server_with(Duration::from_secs(3600), Duration::from_secs(30)).await
}

pub async fn spawn_server_with(default_ttl: Duration, heartbeat: Duration) -> Result<TestServer> {
    let observers = Arc::new(ObserverManager::new(64));
    let store = Arc::new(SessionStore::new(default_ttl, observers.clone()));
    let shutdown = CancellationToken::new();

    // Sweep fast enough that liveness assertions run in test time.
    observers.spawn_sweeper(Duration::from_millis(500), shutdown.child_token());
    store.spawn_ttl_sweeper(Duration::from_secs(60), shutdown.child_token());

    let listener = bind("127.0.0.1", 0).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(serve(
        listener,
        store.clone(),
        heartbeat,
        shutdown.clone(),
    ));

    Ok(TestServer {
        addr,
        store,
        observers,
        shutdown,
        handle,
    })
}

pub async fn connect(addr: SocketAddr) -> Result<VariableBridgeClient<Channel>> {
    VariableBridgeClient::connect(format!("http://{addr}"))
        .await
        .context("failed to connect to in-process server")
}

pub fn any(value: &Value) -> Result<prost_types::Any> {
    Ok(encode_value(value)?)
}

pub async fn init_session(
    client: &mut VariableBridgeClient<Channel>,
    session_id: &str,
    ttl_seconds: u64,
) -> Result<pb::SessionInfo> {
    let resp = client
        .initialize_session(pb::InitializeSessionRequest {
            session_id: session_id.to_string(),
            ttl_seconds,
        })
        .await?
        .into_inner();
    match resp.result {
        Some(pb::initialize_session_response::Result::Session(info)) => Ok(info),
        Some(pb::initialize_session_response::Result::Error(e)) => bail!("init failed: {e}"),
        None => bail!("empty init response"),
    }
}

pub async fn register(
    client: &mut VariableBridgeClient<Channel>,
    session_id: &str,
    name: &str,
    vtype: pb::VariableType,
    initial: &Value,
    constraints: &[(&str, serde_json::Value)],
) -> Result<String> {
    let mut wire_constraints = std::collections::HashMap::new();
    for (key, value) in constraints {
        wire_constraints.insert(
            key.to_string(),
            varbridge_rs::codec::encode_constraint(value)?,
        );
    }
    let resp = client
        .register_variable(pb::RegisterVariableRequest {
            session_id: session_id.to_string(),
            name: name.to_string(),
            r#type: vtype as i32,
            initial_value: Some(any(initial)?),
            constraints: wire_constraints,
            metadata: Default::default(),
        })
        .await?
        .into_inner();
    match resp.result {
        Some(pb::register_variable_response::Result::VariableId(id)) => Ok(id),
        Some(pb::register_variable_response::Result::Error(e)) => bail!("register failed: {e}"),
        None => bail!("empty register response"),
    }
}

/// Fetch a variable, returning the error arm as Err.
pub async fn get_variable(
    client: &mut VariableBridgeClient<Channel>,
    session_id: &str,
    identifier: &str,
) -> std::result::Result<pb::Variable, String> {
    let resp = client
        .get_variable(pb::GetVariableRequest {
            session_id: session_id.to_string(),
            identifier: identifier.to_string(),
        })
        .await
        .map_err(|s| format!("transport: {s}"))?
        .into_inner();
    match resp.result {
        Some(pb::get_variable_response::Result::Variable(var)) => Ok(var),
        Some(pb::get_variable_response::Result::Error(e)) => Err(e),
        None => Err("empty response".to_string()),
    }
}

pub async fn update_variable(
    client: &mut VariableBridgeClient<Channel>,
    session_id: &str,
    identifier: &str,
    value: &Value,
) -> std::result::Result<pb::Variable, String> {
    update_variable_any(
        client,
        session_id,
        identifier,
        encode_value(value).map_err(|e| e.to_string())?,
    )
    .await
}

pub async fn update_variable_any(
    client: &mut VariableBridgeClient<Channel>,
    session_id: &str,
    identifier: &str,
    value: prost_types::Any,
) -> std::result::Result<pb::Variable, String> {
    let resp = client
        .update_variable(pb::UpdateVariableRequest {
            session_id: session_id.to_string(),
            identifier: identifier.to_string(),
            value: Some(value),
            metadata: Default::default(),
        })
        .await
        .map_err(|s| format!("transport: {s}"))?
        .into_inner();
    match resp.result {
        Some(pb::update_variable_response::Result::Variable(var)) => Ok(var),
        Some(pb::update_variable_response::Result::Error(e)) => Err(e),
        None => Err("empty response".to_string()),
    }
}

/// Decode the typed payload out of a wire variable.
pub fn decoded_value(var: &pb::Variable) -> Result<Value> {
    let vtype = varbridge_rs::rpc::convert::vartype_from_proto(var.r#type)?;
    let any = var.value.as_ref().context("variable carries no value")?;
    Ok(varbridge_rs::codec::decode_value(vtype, any)?)
}
