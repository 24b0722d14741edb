// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::observer::UpdateEvent;

/// Metadata key carrying the number of events shed since the previous
/// delivery.
pub const DROPPED_METADATA_KEY: &str = "dropped_updates";

/// Bounded single-consumer event queue. Overflow policy is drop-oldest:
/// the store never blocks on a slow stream, freshness wins over
/// completeness. The shed count is surfaced on the next delivered event.
pub struct UpdateQueue {
    inner: Mutex<VecDeque<UpdateEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue, shedding the oldest entry when full. Never blocks.
    pub fn push(&self, event: UpdateEvent) {
        {
            let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if q.len() == self.capacity {
                q.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Non-blocking pop. Attaches the pending shed count to the returned
    /// event's metadata.
    pub fn try_pop(&self) -> Option<UpdateEvent> {
        let mut event = {
            let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            q.pop_front()?
        };
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            event
                .metadata
                .insert(DROPPED_METADATA_KEY.to_string(), dropped.to_string());
        }
        Some(event)
    }

    /// Await the next event. Pending entries are drained even after
    /// cancellation; `None` means cancelled and empty.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<UpdateEvent> {
        loop {
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            tokio::select! {
                _ = cancel.cancelled() => return self.try_pop(),
                _ = self.notify.notified() => {},
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
