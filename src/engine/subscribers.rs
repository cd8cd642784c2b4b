//! Snapshot subscription registry
//!
//! An explicit publish-subscribe channel: observers register a callback
//! and receive every published snapshot. A panicking subscriber must not
//! prevent the others from being notified, nor crash the scheduling loop,
//! so each invocation is isolated.

use log::warn;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::types::TrafficSnapshot;

/// Handle identifying a registered subscriber; pass it back to
/// `unsubscribe` to stop receiving snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

pub(crate) type SnapshotCallback = Box<dyn FnMut(&TrafficSnapshot)>;

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: u64,
    entries: Vec<(SubscriberId, SnapshotCallback)>,
}

impl SubscriberRegistry {
    pub fn add(&mut self, callback: SnapshotCallback) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    /// Remove a subscriber; returns false for unknown ids.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        before != self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn notify_all(&mut self, snapshot: &TrafficSnapshot) {
        for (id, callback) in &mut self.entries {
            invoke(*id, callback, snapshot);
        }
    }

    /// Deliver the current snapshot to a single subscriber (immediate
    /// replay on registration).
    pub fn notify_one(&mut self, id: SubscriberId, snapshot: &TrafficSnapshot) {
        if let Some((_, callback)) = self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            invoke(id, callback, snapshot);
        }
    }
}

fn invoke(id: SubscriberId, callback: &mut SnapshotCallback, snapshot: &TrafficSnapshot) {
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(snapshot)));
    if outcome.is_err() {
        warn!("subscriber {id:?} panicked while handling a snapshot; skipping it");
    }
}
