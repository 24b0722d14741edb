// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use tokio::sync::RwLock;

use crate::{store::variable::Variable, utils::now_millis};

/// One TTL-scoped namespace of variables. The variable table sits behind a
/// per-session lock; activity tracking is lock-free so `touch` stays cheap
/// on every op.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: i64,
    pub ttl: Duration,
    last_activity_at: AtomicI64,
    pub(crate) state: RwLock<SessionState>,
}

/// Variable table plus the name index. Guarded by [`Session::state`].
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    /// var_id -> record
    pub variables: HashMap<String, Variable>,
    /// name -> var_id
    pub names: HashMap<String, String>,
}

impl SessionState {
    /// Resolve a caller-supplied identifier: variable id first (ids carry
    /// the reserved `var_` prefix), then name.
    pub fn resolve_id<'a>(&'a self, identifier: &'a str) -> Option<&'a str> {
        if self.variables.contains_key(identifier) {
            return Some(identifier);
        }
        self.names.get(identifier).map(String::as_str)
    }
}

impl Session {
    pub fn new(id: &str, ttl: Duration) -> Self {
        let now = now_millis();
        Self {
            id: id.to_string(),
            created_at: now,
            ttl,
            last_activity_at: AtomicI64::new(now),
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Record activity. Invariant: `last_activity_at >= created_at`.
    pub fn touch(&self) {
        self.last_activity_at
            .fetch_max(now_millis(), Ordering::Relaxed);
    }

    pub fn last_activity_at(&self) -> i64 {
        self.last_activity_at.load(Ordering::Relaxed)
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        let idle = now.saturating_sub(self.last_activity_at());
        idle > self.ttl.as_millis() as i64
    }
}
