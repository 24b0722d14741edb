// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashSet,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    observer::{UpdateEvent, queue::UpdateQueue},
    types::Value,
};

pub type ObserverId = u64;

/// Predicate over `(old_value, new_value)`; returning false drops the
/// event for that observer. Runs on the dispatch side.
pub type UpdateFilter = Arc<dyn Fn(Option<&Value>, Option<&Value>) -> bool + Send + Sync>;

/// One registered watcher. Holds only identifiers, a queue and a liveness
/// token; never a pointer into caller memory.
pub struct ObserverRecord {
    pub id: ObserverId,
    pub session_id: String,
    pub var_ids: HashSet<String>,
    filter: Option<UpdateFilter>,
    pub queue: UpdateQueue,
    /// Liveness handle. Cancelled on unregister; the owning stream may
    /// also cancel it to detach early.
    pub cancel: CancellationToken,
}

impl ObserverRecord {
    fn passes(&self, event: &UpdateEvent) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            filter(event.old_value.as_ref(), event.new_value.as_ref())
        }));
        match outcome {
            Ok(keep) => keep,
            Err(_) => {
                warn!(
                    observer = self.id,
                    variable = %event.variable_id,
                    "watch filter panicked; dropping event"
                );
                false
            },
        }
    }
}

impl std::fmt::Debug for ObserverRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRecord")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("var_ids", &self.var_ids)
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Two-level watcher index: `(session, variable) -> observers` plus the
/// observer records themselves. Fan-out is synchronous queue pushes, so a
/// slow or dead sink never blocks the store or its siblings.
pub struct ObserverManager {
    index: DashMap<(String, String), HashSet<ObserverId>>,
    observers: DashMap<ObserverId, Arc<ObserverRecord>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    root: CancellationToken,
}

impl ObserverManager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            index: DashMap::new(),
            observers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity,
            root: CancellationToken::new(),
        }
    }

    /// Insert an observer for the given resolved variable ids. The caller
    /// is expected to hold the owning session's lock so registration and
    /// any snapshot it takes are atomic with respect to mutations.
    pub fn register(
        &self,
        session_id: &str,
        var_ids: HashSet<String>,
        filter: Option<UpdateFilter>,
    ) -> Arc<ObserverRecord> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(ObserverRecord {
            id,
            session_id: session_id.to_string(),
            var_ids,
            filter,
            queue: UpdateQueue::new(self.queue_capacity),
            cancel: self.root.child_token(),
        });
        for var_id in &record.var_ids {
            self.index
                .entry((record.session_id.clone(), var_id.clone()))
                .or_default()
                .insert(id);
        }
        self.observers.insert(id, record.clone());
        debug!(observer = id, session = %session_id, vars = record.var_ids.len(), "observer registered");
        record
    }

    /// Remove an observer and cancel its liveness token. Idempotent.
    pub fn unregister(&self, id: ObserverId) {
        let Some((_, record)) = self.observers.remove(&id) else {
            return;
        };
        record.cancel.cancel();
        for var_id in &record.var_ids {
            let key = (record.session_id.clone(), var_id.clone());
            if let Some(mut set) = self.index.get_mut(&key) {
                set.remove(&id);
                let empty = set.is_empty();
                drop(set);
                if empty {
                    self.index.remove_if(&key, |_, set| set.is_empty());
                }
            }
        }
        debug!(observer = id, "observer unregistered");
    }

    /// Fan an event out to every surviving observer of the variable,
    /// applying per-observer filters. Failure-isolated: one observer
    /// cannot affect another's delivery.
    pub fn notify(&self, session_id: &str, var_id: &str, event: &UpdateEvent) {
        let key = (session_id.to_string(), var_id.to_string());
        let ids: Vec<ObserverId> = match self.index.get(&key) {
            Some(set) => set.iter().copied().collect(),
            None => return,
        };
        for id in ids {
            if let Some(record) = self.observers.get(&id) {
                if record.cancel.is_cancelled() {
                    continue;
                }
                if record.passes(event) {
                    record.queue.push(event.clone());
                }
            }
        }
    }

    /// Drop index entries for a deleted variable. Observers stay
    /// registered for their remaining variables.
    pub fn drop_variable(&self, session_id: &str, var_id: &str) {
        self.index
            .remove(&(session_id.to_string(), var_id.to_string()));
    }

    fn session_observers(&self, session_id: &str) -> Vec<Arc<ObserverRecord>> {
        self.observers
            .iter()
            .filter(|entry| entry.value().session_id == session_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// TTL eviction path: tell every observer of the session that it
    /// expired, then tear them down. Queued events drain before the
    /// terminal one.
    pub fn expire_session(&self, session_id: &str) {
        for record in self.session_observers(session_id) {
            record.queue.push(UpdateEvent::session_expired(session_id));
            self.unregister(record.id);
        }
    }

    /// Explicit-delete path: tear observers down without an expiry event.
    pub fn teardown_session(&self, session_id: &str) {
        for record in self.session_observers(session_id) {
            self.unregister(record.id);
        }
    }

    /// Debug/introspection: handles watching anything in the session.
    pub fn watchers_of(&self, session_id: &str) -> Vec<ObserverId> {
        let mut ids: Vec<ObserverId> = self
            .session_observers(session_id)
            .iter()
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn watcher_count(&self, session_id: &str) -> usize {
        self.session_observers(session_id).len()
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.observers.contains_key(&id)
    }

    /// Backstop cleanup: drop observers whose liveness token died without
    /// an explicit unregister.
    pub fn sweep(&self) -> usize {
        let dead: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|entry| entry.value().cancel.is_cancelled())
            .map(|entry| entry.value().id)
            .collect();
        let n = dead.len();
        for id in dead {
            self.unregister(id);
        }
        n
    }

    /// Cancel every observer; used on server shutdown so watch streams
    /// finish promptly.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let swept = manager.sweep();
                        if swept > 0 {
                            debug!(swept, "removed dead observers");
                        }
                    },
                }
            }
        })
    }
}
