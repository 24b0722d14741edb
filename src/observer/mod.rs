// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Watch engine: a concurrent registry of observers per (session,
//! variable), bounded per-observer queues and the per-stream dispatch
//! task that feeds a gRPC response stream.

use std::collections::BTreeMap;

use crate::{store::variable::Variable, types::Value, utils::now_millis};

/// Per-stream outbound dispatch.
pub mod dispatch;
/// Observer registry and fan-out.
pub mod manager;
/// Bounded drop-oldest event queue.
pub mod queue;

pub use manager::{ObserverId, ObserverManager, ObserverRecord, UpdateFilter};

/// What happened to a watched variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Value mutation.
    Value,
    /// Snapshot entry sent right after watch registration.
    Initial,
    /// The variable was deleted.
    Deleted,
    /// The owning session expired; no further events follow.
    SessionExpired,
}

/// A single ordered update as seen by one observer.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub session_id: String,
    pub variable_id: String,
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub version: u32,
    pub metadata: BTreeMap<String, String>,
    pub timestamp: i64,
    pub kind: UpdateKind,
}

impl UpdateEvent {
    pub fn value_update(
        session_id: &str,
        var: &Variable,
        old_value: Value,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            variable_id: var.id.clone(),
            name: var.name.clone(),
            old_value: Some(old_value),
            new_value: Some(var.value.clone()),
            version: var.version,
            metadata,
            timestamp: var.last_updated_at,
            kind: UpdateKind::Value,
        }
    }

    pub fn initial(session_id: &str, var: &Variable) -> Self {
        Self {
            session_id: session_id.to_string(),
            variable_id: var.id.clone(),
            name: var.name.clone(),
            old_value: None,
            new_value: Some(var.value.clone()),
            version: var.version,
            metadata: BTreeMap::new(),
            timestamp: now_millis(),
            kind: UpdateKind::Initial,
        }
    }

    pub fn deleted(session_id: &str, var: &Variable) -> Self {
        Self {
            session_id: session_id.to_string(),
            variable_id: var.id.clone(),
            name: var.name.clone(),
            old_value: Some(var.value.clone()),
            new_value: None,
            version: var.version,
            metadata: BTreeMap::new(),
            timestamp: now_millis(),
            kind: UpdateKind::Deleted,
        }
    }

    pub fn session_expired(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            variable_id: String::new(),
            name: String::new(),
            old_value: None,
            new_value: None,
            version: 0,
            metadata: BTreeMap::new(),
            timestamp: now_millis(),
            kind: UpdateKind::SessionExpired,
        }
    }
}
