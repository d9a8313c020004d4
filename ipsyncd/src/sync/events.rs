use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::state::SyncState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FilesAdded,
    StateChanged,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::FilesAdded => "files-added",
            EventKind::StateChanged => "state-changed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    FilesAdded,
    StateChanged(SyncState),
}

impl SyncEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::FilesAdded => EventKind::FilesAdded,
            SyncEvent::StateChanged(_) => EventKind::StateChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Callback registry, one list per event kind.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Callback)>>>,
}

impl Listeners {
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for callbacks in entries.values_mut() {
            if let Some(pos) = callbacks.iter().position(|(existing, _)| *existing == id) {
                callbacks.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn emit(&self, event: &SyncEvent) {
        // Callbacks run outside the registry lock so they may subscribe.
        let callbacks: Vec<Callback> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(event);
        }
    }
}
