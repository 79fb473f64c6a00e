// SPDX-License-Identifier: GPL-3.0-only

//! Decode events and callback subscriptions

use crate::frame_processor::FrameRegion;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A symbol that made it through the cooldown filter
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeEvent {
    pub payload: String,
    /// Device the frame came from
    pub device_id: String,
    pub detected_at: DateTime<Local>,
    /// Where the symbol was found, if the decoder reports it
    pub region: Option<FrameRegion>,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

/// Callbacks registered for one event kind
pub(crate) struct SubscriberList<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T: 'static> SubscriberList<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push((id, Arc::new(callback)));
        let list: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
        Subscription { id, list }
    }

    /// Invoke every callback with `value`
    ///
    /// The list is copied first so callbacks may subscribe or unsubscribe
    /// without deadlocking.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl<T: 'static> Detach for SubscriberList<T> {
    fn detach(&self, id: u64) {
        self.entries.lock().unwrap().retain(|(entry, _)| *entry != id);
    }
}

/// Keeps a callback registered; dropping it detaches the callback
#[must_use = "the callback is detached as soon as the subscription is dropped"]
pub struct Subscription {
    id: u64,
    list: Weak<dyn Detach>,
}

impl Subscription {
    /// Detach now
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
