use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ipsync_core::{AddEntry, StoreError};
use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::acquire::{AcquireError, acquire_daemon};
use super::enumerate::{list_files, relative_path};
use super::events::{EventKind, SubscriptionId, SyncEvent};
use super::state::{FileRecord, FileStats, StatePatch, StateStore, SyncState};
use super::store::StoreBackend;
use super::watcher::{FolderChange, start_folder_watcher};
use crate::config::SyncConfig;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("daemon acquisition failed: {0}")]
    Acquire(#[from] AcquireError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("no daemon is connected")]
    NotConnected,
    #[error("engine was stopped while acquiring the daemon")]
    Stopped,
}

struct FolderWatch {
    _watcher: RecommendedWatcher,
    worker: JoinHandle<()>,
}

/// Keeps one folder ingested into the store and publishes the result as a
/// stream of [`SyncState`] snapshots.
pub struct SyncEngine {
    config: SyncConfig,
    backend: Arc<dyn StoreBackend>,
    state: StateStore,
    pass: tokio::sync::Mutex<()>,
    starting: AtomicBool,
    // Bumped by every stop(); work begun under an older value is discarded.
    generation: AtomicU64,
    watch: Mutex<Option<FolderWatch>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, backend: Arc<dyn StoreBackend>) -> Arc<Self> {
        Arc::new(Self {
            state: StateStore::new(config.folder.clone()),
            config,
            backend,
            pass: tokio::sync::Mutex::new(()),
            starting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            watch: Mutex::new(None),
        })
    }

    /// Creates the engine and, if `auto_start` is set, runs [`Self::start`]
    /// in the background. Must be called from within a Tokio runtime.
    pub fn launch(config: SyncConfig, backend: Arc<dyn StoreBackend>) -> Arc<Self> {
        let engine = Self::new(config, backend);
        engine.autostart();
        engine
    }

    /// Runs [`Self::start`] in the background if `auto_start` is set.
    ///
    /// Lets callers subscribe on a fresh engine before anything happens.
    pub fn autostart(self: &Arc<Self>) {
        if self.config.auto_start {
            let starter = Arc::clone(self);
            tokio::spawn(async move { starter.start().await });
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn folder(&self) -> &Path {
        &self.config.folder
    }

    pub fn state(&self) -> SyncState {
        self.state.snapshot()
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.state.listeners().subscribe(kind, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.listeners().unsubscribe(id)
    }

    pub fn set_state(&self, patch: StatePatch) -> SyncState {
        self.state.set_state(patch)
    }

    /// Watches the folder, acquires a daemon and runs the first resync.
    ///
    /// Failures are logged; observe `state-changed` for the outcome.
    pub async fn start(self: &Arc<Self>) {
        if self.starting.swap(true, Ordering::SeqCst) {
            warn!("sync engine start already in progress");
            return;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.watch().await;
        if self.state().connected {
            debug!("store daemon already connected");
        } else {
            match self.connect_as(generation).await {
                Ok(()) => self.resync_logged().await,
                Err(EngineError::Stopped) => {
                    info!("sync engine stopped during startup");
                    self.release_watch();
                }
                Err(err) => error!(error = %err, "failed to start sync engine"),
            }
        }

        self.starting.store(false, Ordering::SeqCst);
    }

    /// Runs daemon acquisition and records the handle in the state.
    pub async fn connect(&self) -> Result<(), EngineError> {
        self.connect_as(self.generation.load(Ordering::SeqCst)).await
    }

    async fn connect_as(&self, generation: u64) -> Result<(), EngineError> {
        if self.state().connected {
            return Ok(());
        }
        let acquired = acquire_daemon(self.backend.as_ref(), &self.config.repo_path).await?;
        let attached = acquired.is_attached();
        let daemon = acquired.into_daemon();

        // stop() bumps the generation before taking the pass lock, so it either
        // sees this commit or we see its bump.
        let _pass = self.pass.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            daemon.shutdown().await;
            return Err(EngineError::Stopped);
        }
        info!(api = daemon.api_address(), attached, "connected to store daemon");
        self.set_state(StatePatch::connected(daemon));
        Ok(())
    }

    /// Creates the folder if needed and resyncs on every change under it.
    pub async fn watch(self: &Arc<Self>) {
        if let Err(err) = self.try_watch().await {
            error!(
                folder = %self.config.folder.display(),
                error = %err,
                "failed to watch folder"
            );
        }
    }

    async fn try_watch(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.watch_slot().is_some() {
            return Ok(());
        }
        let folder = &self.config.folder;
        tokio::fs::create_dir_all(folder)
            .await
            .map_err(|source| EngineError::Io {
                path: folder.clone(),
                source,
            })?;

        let (watcher, changes) = start_folder_watcher(folder)?;
        let worker = tokio::spawn(run_resync_worker(Arc::downgrade(self), changes));

        let mut slot = self.watch_slot();
        if slot.is_some() {
            worker.abort();
            return Ok(());
        }
        *slot = Some(FolderWatch {
            _watcher: watcher,
            worker,
        });
        info!(folder = %folder.display(), "watching folder");
        Ok(())
    }

    /// One full pass: enumerate, ingest, stat, commit.
    ///
    /// Passes never overlap. The committed file list is replaced only when
    /// every step succeeds.
    pub async fn resync(&self) -> Result<usize, EngineError> {
        let _pass = self.pass.lock().await;
        self.set_state(StatePatch::default().synced(false));
        let files = self.collect_files().await?;
        let count = files.len();
        self.set_state(StatePatch::default().files(files).synced(true));
        Ok(count)
    }

    async fn resync_logged(&self) {
        match self.resync().await {
            Ok(count) => info!(files = count, "resync complete"),
            Err(err) => error!(error = %err, "resync failed"),
        }
    }

    async fn collect_files(&self) -> Result<Vec<FileRecord>, EngineError> {
        let daemon = self.state().daemon.ok_or(EngineError::NotConnected)?;
        let folder = &self.config.folder;
        let paths = list_files(folder).await.map_err(|source| EngineError::Io {
            path: folder.clone(),
            source,
        })?;

        let mut relative_paths = Vec::with_capacity(paths.len());
        let mut entries = Vec::with_capacity(paths.len());
        for path in &paths {
            let relative = relative_path(folder, path)
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|source| EngineError::Io {
                    path: path.clone(),
                    source,
                })?;
            entries.push(AddEntry {
                relative_path: relative.clone(),
                file,
            });
            relative_paths.push(relative);
        }

        let results = daemon.api().add_files(entries).await?;
        if results.len() != paths.len() {
            return Err(StoreError::MissingResult(format!(
                "{} of {} files",
                paths.len().saturating_sub(results.len()),
                paths.len()
            ))
            .into());
        }

        let mut files = Vec::with_capacity(results.len());
        for ((path, relative_path), store_result) in
            paths.into_iter().zip(relative_paths).zip(results)
        {
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|source| EngineError::Io {
                    path: path.clone(),
                    source,
                })?;
            files.push(FileRecord {
                stats: FileStats::from_metadata(&metadata),
                path,
                relative_path,
                store_result,
            });
        }
        Ok(files)
    }

    /// Connects, ingests the folder once and stops again.
    ///
    /// Returns the snapshot as it was before the engine was stopped.
    pub async fn ingest_once(&self) -> Result<SyncState, EngineError> {
        let outcome = self.connect_and_resync().await;
        let snapshot = self.state();
        self.stop().await;
        outcome.map(|files| {
            info!(files, "folder ingested");
            snapshot
        })
    }

    async fn connect_and_resync(&self) -> Result<usize, EngineError> {
        let folder = &self.config.folder;
        tokio::fs::create_dir_all(folder)
            .await
            .map_err(|source| EngineError::Io {
                path: folder.clone(),
                source,
            })?;
        self.connect().await?;
        self.resync().await
    }

    /// Stops watching, releases the daemon and marks the engine disconnected.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.release_watch();

        let _pass = self.pass.lock().await;
        if let Some(daemon) = self.state().daemon {
            daemon.api().shutdown().await;
        }
        self.set_state(StatePatch::disconnected().synced(false));
    }

    fn release_watch(&self) {
        let watch = self.watch_slot().take();
        if let Some(watch) = watch {
            watch.worker.abort();
            info!(folder = %self.config.folder.display(), "stopped watching folder");
        }
    }

    fn watch_slot(&self) -> MutexGuard<'_, Option<FolderWatch>> {
        self.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_resync_worker(
    engine: Weak<SyncEngine>,
    mut changes: mpsc::UnboundedReceiver<FolderChange>,
) {
    while let Some(change) = changes.recv().await {
        debug!(?change, "folder changed");
        // Everything queued while the previous pass ran is covered by one pass.
        while let Ok(change) = changes.try_recv() {
            debug!(?change, "folder changed");
        }
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.resync_logged().await;
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
