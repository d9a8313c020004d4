use std::path::Path;

use notify::event::{AccessKind, AccessMode, MetadataKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::enumerate::relative_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderChange {
    Created { path: String },
    Modified { path: String },
    Removed { path: String },
    Renamed { from: String, to: String },
}

/// Watches `root` recursively and forwards every content change.
///
/// The returned watcher must be kept alive for notifications to flow.
pub fn start_folder_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<FolderChange>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for change in map_event(&watch_root, event) {
                let _ = tx.send(change);
            }
        }
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(root: &Path, event: Event) -> Vec<FolderChange> {
    match event.kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            paths(root, event, |path| FolderChange::Modified { path })
        }
        // Reading files during ingestion must not schedule another pass.
        EventKind::Access(_)
        | EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) if event.paths.len() >= 2 => {
            match (
                relative_path(root, &event.paths[0]),
                relative_path(root, &event.paths[1]),
            ) {
                (Some(from), Some(to)) => vec![FolderChange::Renamed { from, to }],
                (Some(path), None) => vec![FolderChange::Removed { path }],
                (None, Some(path)) => vec![FolderChange::Created { path }],
                (None, None) => Vec::new(),
            }
        }
        EventKind::Create(_) => paths(root, event, |path| FolderChange::Created { path }),
        EventKind::Modify(_) => paths(root, event, |path| FolderChange::Modified { path }),
        EventKind::Remove(_) => paths(root, event, |path| FolderChange::Removed { path }),
        _ => Vec::new(),
    }
}

fn paths(root: &Path, event: Event, change: fn(String) -> FolderChange) -> Vec<FolderChange> {
    event
        .paths
        .into_iter()
        .filter_map(|path| relative_path(root, &path))
        .map(change)
        .collect()
}
