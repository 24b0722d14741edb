// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Authoritative session registry: TTL-managed sessions, typed variables
//! with monotonic versioning, batch updates and watch registration. The
//! store is the only mutator of variable state; observers are fed
//! synchronously under the owning session's lock, which is what makes
//! per-variable version order and watch atomicity hold.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    codec::TaggedPayload,
    error::{BridgeError, Result},
    observer::{ObserverId, ObserverManager, ObserverRecord, UpdateEvent, UpdateFilter},
    store::{session::Session, variable::Variable},
    types::{Constraints, TypeCheck, VarType},
    utils::{now_millis, variable_id, wildcard_regex},
};

/// Session bookkeeping.
pub mod session;
/// The variable record.
pub mod variable;

/// Default session TTL when neither the request nor the environment says
/// otherwise.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Snapshot of session metadata for introspection.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub id: String,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub ttl: Duration,
    pub variable_count: usize,
    pub watcher_count: usize,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub already_existed: bool,
    pub meta: SessionMeta,
}

/// Result of a batch get; partial success is normal.
#[derive(Debug, Clone, Default)]
pub struct BatchGet {
    pub found: BTreeMap<String, Variable>,
    pub missing: Vec<String>,
}

/// Result of a non-atomic batch update (or a fully-applied atomic one).
#[derive(Debug, Clone, Default)]
pub struct BatchUpdate {
    pub new_versions: BTreeMap<String, u32>,
    pub errors: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct WatchOptions {
    pub include_initial: bool,
    pub filter: Option<UpdateFilter>,
}

/// The concurrent session registry.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    observers: Arc<ObserverManager>,
    default_ttl: Duration,
}

impl SessionStore {
    pub fn new(default_ttl: Duration, observers: Arc<ObserverManager>) -> Self {
        Self {
            sessions: DashMap::new(),
            observers,
            default_ttl,
        }
    }

    pub fn observers(&self) -> &Arc<ObserverManager> {
        &self.observers
    }

    /// Look a session up, lazily evicting it when its TTL has lapsed.
    /// Every public op funnels through here, which is also what implements
    /// the implicit `touch` on access.
    fn live_session(&self, id: &str) -> Result<Arc<Session>> {
        if id.is_empty() {
            return Err(BridgeError::ValidationFailed(
                "session id must not be empty".to_string(),
            ));
        }
        let session = {
            let entry = self
                .sessions
                .get(id)
                .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
            Arc::clone(entry.value())
        };
        if session.is_expired_at(now_millis()) {
            self.evict(id);
            return Err(BridgeError::SessionExpired(id.to_string()));
        }
        session.touch();
        Ok(session)
    }

    /// Remove a session and notify+tear down its observers. Used by both
    /// the lazy check and the background sweeper; the predicate keeps a
    /// concurrent re-create of the same id from being swept by mistake.
    fn evict(&self, id: &str) {
        let removed = self
            .sessions
            .remove_if(id, |_, session| session.is_expired_at(now_millis()));
        if removed.is_some() {
            self.observers.expire_session(id);
            info!(session = %id, "session expired");
        }
    }

    /// Idempotent for a live id: the existing session is touched but its
    /// state and TTL stay untouched.
    pub async fn create_session(&self, id: &str, ttl: Option<Duration>) -> Result<CreateOutcome> {
        if id.is_empty() {
            return Err(BridgeError::ValidationFailed(
                "session id must not be empty".to_string(),
            ));
        }
        let ttl = ttl.unwrap_or(self.default_ttl);

        // An expired occupant frees its id for reuse.
        let lapsed = self
            .sessions
            .get(id)
            .map(|s| s.is_expired_at(now_millis()))
            .unwrap_or(false);
        if lapsed {
            self.evict(id);
        }

        let mut already_existed = false;
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                already_existed = true;
                entry.get().touch();
            },
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Session::new(id, ttl)));
                info!(session = %id, ttl_secs = ttl.as_secs(), "session created");
            },
        }

        let meta = self.session_info(id).await?;
        Ok(CreateOutcome {
            already_existed,
            meta,
        })
    }

    /// Remove a session, its variables and its observers.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let (_, _session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        self.observers.teardown_session(id);
        info!(session = %id, "session deleted");
        Ok(())
    }

    /// Explicit activity bump; returns the new `last_activity_at`.
    pub fn touch_session(&self, id: &str) -> Result<i64> {
        let session = self.live_session(id)?;
        Ok(session.last_activity_at())
    }

    pub async fn session_info(&self, id: &str) -> Result<SessionMeta> {
        let session = self.live_session(id)?;
        let state = session.state.read().await;
        Ok(SessionMeta {
            id: session.id.clone(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at(),
            ttl: session.ttl,
            variable_count: state.variables.len(),
            watcher_count: self.observers.watcher_count(id),
        })
    }

    /// Register a variable: validate the initial value against the declared
    /// type and constraints, allocate a `var_<name>_<unique>` id, insert at
    /// version 0.
    pub async fn register_variable(
        &self,
        session_id: &str,
        name: &str,
        vtype: VarType,
        initial: TaggedPayload,
        constraints: Constraints,
        metadata: BTreeMap<String, String>,
    ) -> Result<String> {
        if name.is_empty() {
            return Err(BridgeError::ValidationFailed(
                "variable name must not be empty".to_string(),
            ));
        }
        let session = self.live_session(session_id)?;
        let mut state = session.state.write().await;
        if state.names.contains_key(name) {
            return Err(BridgeError::AlreadyExists(name.to_string()));
        }

        let value = initial.into_value(vtype)?;
        vtype.handler().validate_constraints(&value, &constraints)?;

        let mut id = variable_id(name);
        // Practically unreachable, but ids must stay unique.
        while state.variables.contains_key(&id) {
            id = variable_id(name);
        }

        let var = Variable::new(
            id.clone(),
            name.to_string(),
            vtype,
            value,
            constraints,
            metadata,
        );
        state.names.insert(name.to_string(), id.clone());
        state.variables.insert(id.clone(), var);
        debug!(session = %session_id, variable = %id, %vtype, "variable registered");
        Ok(id)
    }

    /// Fetch by name or id.
    pub async fn get_variable(&self, session_id: &str, identifier: &str) -> Result<Variable> {
        let session = self.live_session(session_id)?;
        let state = session.state.read().await;
        let var_id = state
            .resolve_id(identifier)
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))?;
        state
            .variables
            .get(var_id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))
    }

    /// Re-validate and apply a single update. On success the version
    /// advances by exactly one and one event with that version is emitted
    /// before the session lock is released; on failure nothing changes.
    pub async fn update_variable(
        &self,
        session_id: &str,
        identifier: &str,
        incoming: TaggedPayload,
        metadata: BTreeMap<String, String>,
    ) -> Result<Variable> {
        let session = self.live_session(session_id)?;
        let mut state = session.state.write().await;
        let var_id = state
            .resolve_id(identifier)
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))?
            .to_string();

        let var = state
            .variables
            .get_mut(&var_id)
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))?;
        let value = incoming.into_value(var.vtype)?;
        var.vtype
            .handler()
            .validate_constraints(&value, &var.constraints)?;

        let old = std::mem::replace(&mut var.value, value);
        var.version += 1;
        var.last_updated_at = now_millis();
        var.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

        let event = UpdateEvent::value_update(session_id, var, old, metadata);
        let snapshot = var.clone();
        self.observers.notify(session_id, &var_id, &event);
        drop(state);

        Ok(snapshot)
    }

    /// List variables whose name matches the `*`-wildcard pattern; absent
    /// or empty pattern lists everything. Sorted by name.
    pub async fn list_variables(
        &self,
        session_id: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<Variable>> {
        let session = self.live_session(session_id)?;
        let state = session.state.read().await;
        let matcher = match pattern {
            None | Some("") => None,
            Some(p) => Some(wildcard_regex(p)?),
        };
        let mut out: Vec<Variable> = state
            .variables
            .values()
            .filter(|v| matcher.as_ref().is_none_or(|re| re.is_match(&v.name)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Remove a variable and emit a `Deleted` event to its observers.
    pub async fn delete_variable(&self, session_id: &str, identifier: &str) -> Result<String> {
        let session = self.live_session(session_id)?;
        let mut state = session.state.write().await;
        let var_id = state
            .resolve_id(identifier)
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))?
            .to_string();
        let var = state
            .variables
            .remove(&var_id)
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))?;
        state.names.remove(&var.name);

        let event = UpdateEvent::deleted(session_id, &var);
        self.observers.notify(session_id, &var_id, &event);
        self.observers.drop_variable(session_id, &var_id);
        drop(state);

        debug!(session = %session_id, variable = %var_id, "variable deleted");
        Ok(var_id)
    }

    /// Batch fetch. Missing identifiers are reported, not fatal.
    pub async fn get_variables(
        &self,
        session_id: &str,
        identifiers: &[String],
    ) -> Result<BatchGet> {
        let session = self.live_session(session_id)?;
        let state = session.state.read().await;
        let mut out = BatchGet::default();
        for identifier in identifiers {
            match state
                .resolve_id(identifier)
                .and_then(|id| state.variables.get(id))
            {
                Some(var) => {
                    out.found.insert(identifier.clone(), var.clone());
                },
                None => out.missing.push(identifier.clone()),
            }
        }
        Ok(out)
    }

    /// Batch update over one consistent pre-state. Non-atomic: every key is
    /// attempted, per-key outcomes are reported. Atomic: a single failure
    /// rejects the whole batch and nothing is applied.
    pub async fn update_variables(
        &self,
        session_id: &str,
        updates: BTreeMap<String, TaggedPayload>,
        atomic: bool,
        metadata: BTreeMap<String, String>,
    ) -> Result<BatchUpdate> {
        let session = self.live_session(session_id)?;
        let mut state = session.state.write().await;

        let mut errors = BTreeMap::new();
        let mut staged = Vec::with_capacity(updates.len());
        for (identifier, incoming) in updates {
            let checked = (|| {
                let var_id = state
                    .resolve_id(&identifier)
                    .ok_or_else(|| BridgeError::NotFound(identifier.clone()))?
                    .to_string();
                let var = state
                    .variables
                    .get(&var_id)
                    .ok_or_else(|| BridgeError::NotFound(identifier.clone()))?;
                let value = incoming.into_value(var.vtype)?;
                var.vtype
                    .handler()
                    .validate_constraints(&value, &var.constraints)?;
                Ok::<_, BridgeError>((var_id, value))
            })();
            match checked {
                Ok((var_id, value)) => staged.push((identifier, var_id, value)),
                Err(e) => {
                    errors.insert(identifier, e.to_wire());
                },
            }
        }

        if atomic && !errors.is_empty() {
            return Err(BridgeError::BatchFailed { errors });
        }

        let mut new_versions = BTreeMap::new();
        for (identifier, var_id, value) in staged {
            let Some(var) = state.variables.get_mut(&var_id) else {
                continue;
            };
            let old = std::mem::replace(&mut var.value, value);
            var.version += 1;
            var.last_updated_at = now_millis();
            var.metadata
                .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
            let event = UpdateEvent::value_update(session_id, var, old, metadata.clone());
            new_versions.insert(identifier, var.version);
            self.observers.notify(session_id, &var_id, &event);
        }
        drop(state);

        Ok(BatchUpdate {
            new_versions,
            errors,
        })
    }

    /// Flip the caller-visible optimizing flag. Not a value mutation: the
    /// version does not advance and no event is emitted.
    // TODO: expose over the wire once the optimizer control surface lands.
    pub async fn set_optimizing(
        &self,
        session_id: &str,
        identifier: &str,
        optimizing: bool,
    ) -> Result<()> {
        let session = self.live_session(session_id)?;
        let mut state = session.state.write().await;
        let var_id = state
            .resolve_id(identifier)
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))?
            .to_string();
        let var = state
            .variables
            .get_mut(&var_id)
            .ok_or_else(|| BridgeError::NotFound(identifier.to_string()))?;
        var.optimizing = optimizing;
        Ok(())
    }

    /// Atomically register an observer and snapshot the watched variables.
    /// Both happen under the session write lock, so an update can never
    /// fall between snapshot and registration; events racing the watch are
    /// queued after the snapshot entries. The snapshot is returned sorted
    /// by name.
    pub async fn watch_variables(
        &self,
        session_id: &str,
        identifiers: &[String],
        opts: WatchOptions,
    ) -> Result<(Arc<ObserverRecord>, Vec<Variable>)> {
        let session = self.live_session(session_id)?;
        let state = session.state.write().await;

        let mut var_ids = HashSet::new();
        for identifier in identifiers {
            if identifier.contains('*') {
                let re = wildcard_regex(identifier)?;
                for (name, id) in &state.names {
                    if re.is_match(name) {
                        var_ids.insert(id.clone());
                    }
                }
            } else if let Some(id) = state.resolve_id(identifier) {
                var_ids.insert(id.to_string());
            }
            // Unknown identifiers are not errors; they resolve to nothing.
        }

        let mut snapshot: Vec<Variable> = var_ids
            .iter()
            .filter_map(|id| state.variables.get(id).cloned())
            .collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));

        let record = self
            .observers
            .register(session_id, var_ids, opts.filter);
        if opts.include_initial {
            for var in &snapshot {
                record.queue.push(UpdateEvent::initial(session_id, var));
            }
        }
        drop(state);

        debug!(
            session = %session_id,
            observer = record.id,
            watched = snapshot.len(),
            "watch registered"
        );
        Ok((record, snapshot))
    }

    /// Debug/introspection: observer handles registered for the session.
    pub fn list_watchers(&self, session_id: &str) -> Vec<ObserverId> {
        self.observers.watchers_of(session_id)
    }

    /// One sweep pass; returns the number of sessions evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = now_millis();
        let lapsed: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();
        let count = lapsed.len();
        for id in &lapsed {
            self.evict(id);
        }
        count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Background TTL eviction. Lazy checks keep single lookups correct;
    /// the sweeper exists so dead sessions and their observers do not stay
    /// resident.
    pub fn spawn_ttl_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let swept = store.sweep_expired();
                        if swept > 0 {
                            debug!(swept, "ttl sweep evicted sessions");
                        }
                    },
                }
            }
        })
    }
}
