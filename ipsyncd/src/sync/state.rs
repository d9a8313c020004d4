use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use ipsync_core::AddResult;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;

use super::events::{Listeners, SyncEvent};
use super::store::StoreApi;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub modified: Option<OffsetDateTime>,
    pub readonly: bool,
}

impl FileStats {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok().map(OffsetDateTime::from),
            readonly: metadata.permissions().readonly(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: PathBuf,
    pub relative_path: String,
    pub stats: FileStats,
    pub store_result: AddResult,
}

/// Shared reference to the connected daemon. Equality is identity.
#[derive(Clone)]
pub struct DaemonRef(Arc<dyn StoreApi>);

impl DaemonRef {
    pub fn new(api: Arc<dyn StoreApi>) -> Self {
        Self(api)
    }

    pub fn api(&self) -> &Arc<dyn StoreApi> {
        &self.0
    }

    pub fn api_address(&self) -> &str {
        self.0.api_address()
    }
}

impl PartialEq for DaemonRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl std::fmt::Debug for DaemonRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DaemonRef").field(&self.api_address()).finish()
    }
}

impl Serialize for DaemonRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.api_address())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncState {
    pub folder: PathBuf,
    pub connected: bool,
    pub synced: bool,
    pub daemon: Option<DaemonRef>,
    pub files: Vec<FileRecord>,
}

impl SyncState {
    pub fn new(folder: PathBuf) -> Self {
        Self {
            folder,
            connected: false,
            synced: false,
            daemon: None,
            files: Vec::new(),
        }
    }
}

/// A shallow partial update. Absent fields keep their previous value.
///
/// `folder` cannot be patched, and `connected` only moves together with
/// `daemon`, so a patch can never produce a connected state without a
/// daemon or the reverse.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    link: Option<Option<DaemonRef>>,
    synced: Option<bool>,
    files: Option<Vec<FileRecord>>,
}

impl StatePatch {
    pub fn connected(daemon: Arc<dyn StoreApi>) -> Self {
        Self {
            link: Some(Some(DaemonRef::new(daemon))),
            ..Self::default()
        }
    }

    pub fn disconnected() -> Self {
        Self {
            link: Some(None),
            ..Self::default()
        }
    }

    pub fn synced(mut self, synced: bool) -> Self {
        self.synced = Some(synced);
        self
    }

    pub fn files(mut self, files: Vec<FileRecord>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn apply(self, previous: &SyncState) -> SyncState {
        let mut next = previous.clone();
        if let Some(daemon) = self.link {
            next.connected = daemon.is_some();
            next.daemon = daemon;
        }
        if let Some(synced) = self.synced {
            next.synced = synced;
        }
        if let Some(files) = self.files {
            next.files = files;
        }
        next
    }
}

/// Owns the current snapshot and is the only place it is written.
pub struct StateStore {
    current: Mutex<SyncState>,
    transition: Mutex<()>,
    // Thread running the current transition, if any.
    notifying: Mutex<Option<ThreadId>>,
    listeners: Listeners,
}

impl StateStore {
    pub fn new(folder: PathBuf) -> Self {
        Self {
            current: Mutex::new(SyncState::new(folder)),
            transition: Mutex::new(()),
            notifying: Mutex::new(None),
            listeners: Listeners::default(),
        }
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn snapshot(&self) -> SyncState {
        lock(&self.current).clone()
    }

    /// Merges `patch` into the snapshot and notifies listeners.
    ///
    /// Listeners run while the transition is held; they may read the
    /// snapshot but must not call `set_state` themselves.
    ///
    /// # Panics
    ///
    /// When called from a listener, instead of deadlocking.
    pub fn set_state(&self, patch: StatePatch) -> SyncState {
        let current_thread = thread::current().id();
        assert_ne!(
            *lock(&self.notifying),
            Some(current_thread),
            "set_state called from a state listener"
        );
        let _transition = lock(&self.transition);
        let _owner = TransitionOwner::claim(&self.notifying, current_thread);
        let previous = self.snapshot();
        let next = patch.apply(&previous);
        if next.files.len() > previous.files.len() {
            self.listeners.emit(&SyncEvent::FilesAdded);
        }
        *lock(&self.current) = next.clone();
        self.listeners.emit(&SyncEvent::StateChanged(next.clone()));
        next
    }
}

struct TransitionOwner<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> TransitionOwner<'a> {
    fn claim(slot: &'a Mutex<Option<ThreadId>>, thread: ThreadId) -> Self {
        *lock(slot) = Some(thread);
        Self(slot)
    }
}

impl Drop for TransitionOwner<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::EventKind;
    use crate::sync::test_support::{FakeStore, Script};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(name: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/sync").join(name),
            relative_path: name.to_string(),
            stats: FileStats {
                size: 1,
                modified: None,
                readonly: false,
            },
            store_result: AddResult {
                name: name.to_string(),
                hash: format!("Qm{name}"),
                size: "1".into(),
            },
        }
    }

    fn counter(store: &StateStore, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        store.listeners().subscribe(kind, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn patch_keeps_fields_it_does_not_mention() {
        let daemon: Arc<dyn StoreApi> =
            FakeStore::attached("/ip4/127.0.0.1/tcp/5001", Script::shared());
        let base = StatePatch::connected(daemon)
            .files(vec![record("a.txt")])
            .apply(&SyncState::new(PathBuf::from("/sync")));

        let next = StatePatch::default().synced(true).apply(&base);
        assert!(next.synced);
        assert_eq!(next.folder, base.folder);
        assert_eq!(next.connected, base.connected);
        assert_eq!(next.daemon, base.daemon);
        assert_eq!(next.files, base.files);

        let next = StatePatch::default().files(Vec::new()).apply(&next);
        assert!(next.files.is_empty());
        assert!(next.synced);
        assert!(next.connected);
    }

    #[test]
    fn connected_and_daemon_move_together() {
        let daemon: Arc<dyn StoreApi> =
            FakeStore::attached("/ip4/127.0.0.1/tcp/5001", Script::shared());
        let start = SyncState::new(PathBuf::from("/sync"));

        let connected = StatePatch::connected(daemon).apply(&start);
        assert!(connected.connected);
        assert_eq!(
            connected.daemon.as_ref().map(DaemonRef::api_address),
            Some("/ip4/127.0.0.1/tcp/5001")
        );

        let disconnected = StatePatch::disconnected().apply(&connected);
        assert!(!disconnected.connected);
        assert!(disconnected.daemon.is_none());
    }

    #[test]
    fn growing_file_list_emits_files_added_once() {
        let store = StateStore::new(PathBuf::from("/sync"));
        let added = counter(&store, EventKind::FilesAdded);

        store.set_state(StatePatch::default().files(vec![record("a.txt")]));
        assert_eq!(added.load(Ordering::SeqCst), 1);

        store.set_state(StatePatch::default().files(vec![record("a.txt"), record("b.txt")]));
        assert_eq!(added.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn same_or_smaller_file_list_does_not_emit_files_added() {
        let store = StateStore::new(PathBuf::from("/sync"));
        store.set_state(StatePatch::default().files(vec![record("a.txt"), record("b.txt")]));
        let added = counter(&store, EventKind::FilesAdded);

        store.set_state(StatePatch::default().files(vec![record("c.txt"), record("d.txt")]));
        store.set_state(StatePatch::default().files(vec![record("c.txt")]));
        store.set_state(StatePatch::default().synced(true));

        assert_eq!(added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_update_emits_state_changed_with_the_new_snapshot() {
        let store = StateStore::new(PathBuf::from("/sync"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .listeners()
            .subscribe(EventKind::StateChanged, move |event| {
                if let SyncEvent::StateChanged(state) = event {
                    sink.lock().unwrap().push(state.clone());
                }
            });

        let first = store.set_state(StatePatch::default().synced(false));
        let second = store.set_state(StatePatch::default().synced(true));
        let third = store.set_state(StatePatch::default());

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![first, second, third.clone()]);
        assert_eq!(store.snapshot(), third);
    }

    #[test]
    #[should_panic(expected = "set_state called from a state listener")]
    fn listener_calling_set_state_panics_instead_of_deadlocking() {
        let store = Arc::new(StateStore::new(PathBuf::from("/sync")));
        let inner = Arc::downgrade(&store);
        store
            .listeners()
            .subscribe(EventKind::StateChanged, move |_| {
                if let Some(store) = inner.upgrade() {
                    store.set_state(StatePatch::default());
                }
            });

        store.set_state(StatePatch::default().synced(true));
    }

    #[test]
    fn transitions_from_other_threads_still_run() {
        let store = Arc::new(StateStore::new(PathBuf::from("/sync")));
        let other = Arc::clone(&store);
        std::thread::spawn(move || other.set_state(StatePatch::default().synced(true)))
            .join()
            .unwrap();

        let next = store.set_state(StatePatch::default());
        assert!(next.synced);
    }

    #[test]
    fn snapshot_serializes_daemon_as_its_address() {
        let daemon: Arc<dyn StoreApi> =
            FakeStore::attached("/ip4/127.0.0.1/tcp/5001", Script::shared());
        let state = StatePatch::connected(daemon)
            .files(vec![record("note.txt")])
            .synced(true)
            .apply(&SyncState::new(PathBuf::from("/sync")));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["daemon"], "/ip4/127.0.0.1/tcp/5001");
        assert_eq!(json["files"][0]["relativePath"], "note.txt");
        assert_eq!(json["files"][0]["storeResult"]["hash"], "Qmnote.txt");
        assert!(json["files"][0]["stats"]["modified"].is_null());
    }
}
