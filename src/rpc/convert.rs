// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::{BTreeMap, HashMap};

use prost_types::Any;

use crate::{
    codec,
    error::{BridgeError, Result},
    observer::{UpdateEvent, UpdateKind},
    proto::v1 as pb,
    store::{SessionMeta, variable::Variable},
    types::{Constraints, VarType},
    utils::now_millis,
};

pub fn vartype_to_proto(vtype: VarType) -> pb::VariableType {
    match vtype {
        VarType::Float => pb::VariableType::Float,
        VarType::Integer => pb::VariableType::Integer,
        VarType::String => pb::VariableType::String,
        VarType::Boolean => pb::VariableType::Boolean,
        VarType::Choice => pb::VariableType::Choice,
        VarType::Module => pb::VariableType::Module,
        VarType::Embedding => pb::VariableType::Embedding,
        VarType::Tensor => pb::VariableType::Tensor,
    }
}

pub fn vartype_from_proto(raw: i32) -> Result<VarType> {
    let vtype = pb::VariableType::try_from(raw)
        .map_err(|_| BridgeError::InvalidType(format!("unknown type enum {raw}")))?;
    Ok(match vtype {
        pb::VariableType::Float => VarType::Float,
        pb::VariableType::Integer => VarType::Integer,
        pb::VariableType::String => VarType::String,
        pb::VariableType::Boolean => VarType::Boolean,
        pb::VariableType::Choice => VarType::Choice,
        pb::VariableType::Module => VarType::Module,
        pb::VariableType::Embedding => VarType::Embedding,
        pb::VariableType::Tensor => VarType::Tensor,
        pb::VariableType::Unspecified => {
            return Err(BridgeError::InvalidType("type is unspecified".to_string()));
        },
    })
}

fn kind_to_proto(kind: UpdateKind) -> pb::UpdateKind {
    match kind {
        UpdateKind::Value => pb::UpdateKind::Value,
        UpdateKind::Initial => pb::UpdateKind::Initial,
        UpdateKind::Deleted => pb::UpdateKind::Deleted,
        UpdateKind::SessionExpired => pb::UpdateKind::SessionExpired,
    }
}

pub fn constraints_to_proto(constraints: &Constraints) -> Result<HashMap<String, Any>> {
    let mut out = HashMap::with_capacity(constraints.0.len());
    for (key, value) in &constraints.0 {
        out.insert(key.clone(), codec::encode_constraint(value)?);
    }
    Ok(out)
}

pub fn constraints_from_proto(raw: &HashMap<String, Any>) -> Result<Constraints> {
    let mut out = BTreeMap::new();
    for (key, any) in raw {
        out.insert(key.clone(), codec::decode_constraint(any)?);
    }
    Ok(Constraints(out))
}

pub fn metadata_from_proto(raw: &HashMap<String, String>) -> BTreeMap<String, String> {
    raw.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

pub fn metadata_to_proto(metadata: &BTreeMap<String, String>) -> HashMap<String, String> {
    metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

pub fn variable_to_proto(var: &Variable) -> Result<pb::Variable> {
    Ok(pb::Variable {
        id: var.id.clone(),
        name: var.name.clone(),
        r#type: vartype_to_proto(var.vtype) as i32,
        value: Some(codec::encode_value(&var.value)?),
        constraints: constraints_to_proto(&var.constraints)?,
        metadata: metadata_to_proto(&var.metadata),
        version: var.version as i32,
        created_at: var.created_at,
        last_updated_at: var.last_updated_at,
        optimizing: var.optimizing,
    })
}

pub fn update_to_proto(event: &UpdateEvent) -> Result<pb::VariableUpdate> {
    let old_value = event
        .old_value
        .as_ref()
        .map(codec::encode_value)
        .transpose()?;
    let new_value = event
        .new_value
        .as_ref()
        .map(codec::encode_value)
        .transpose()?;
    Ok(pb::VariableUpdate {
        variable_id: event.variable_id.clone(),
        name: event.name.clone(),
        old_value,
        new_value,
        version: event.version as i32,
        metadata: metadata_to_proto(&event.metadata),
        timestamp: event.timestamp,
        kind: kind_to_proto(event.kind) as i32,
    })
}

/// Idle keep-alive: empty variable_id, only the timestamp is meaningful.
pub fn heartbeat_update() -> pb::VariableUpdate {
    pb::VariableUpdate {
        timestamp: now_millis(),
        kind: pb::UpdateKind::Heartbeat as i32,
        ..Default::default()
    }
}

pub fn session_meta_to_proto(meta: &SessionMeta) -> pb::SessionInfo {
    pb::SessionInfo {
        session_id: meta.id.clone(),
        created_at: meta.created_at,
        last_activity_at: meta.last_activity_at,
        ttl_seconds: meta.ttl.as_secs(),
        variable_count: meta.variable_count as u32,
        watcher_count: meta.watcher_count as u32,
    }
}
