use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::paths::is_partial_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Created(PathBuf),
    Deleted(PathBuf),
}

impl LocalEvent {
    pub fn path(&self) -> &Path {
        match self {
            LocalEvent::Created(path) | LocalEvent::Deleted(path) => path,
        }
    }
}

/// Watches `root` (not its subdirectories). Dropping the returned watcher
/// detaches it and closes the channel.
pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<LocalEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for local in map_event(&watch_root, event) {
                let _ = tx.send(local);
            }
        }
        Err(err) => tracing::warn!(error = %err, "local watcher error"),
    })?;
    watcher.watch(root.as_path(), RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

fn map_event(root: &Path, event: Event) -> Vec<LocalEvent> {
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        // A rename pair keeps its order (from, to); either half may fall
        // outside the watched set, e.g. a partial download becoming final.
        let mut raw = event.paths.into_iter();
        let (Some(from), Some(to)) = (raw.next(), raw.next()) else {
            return Vec::new();
        };
        let mut mapped = Vec::new();
        if is_direct_child(root, &from) {
            mapped.push(LocalEvent::Deleted(from));
        }
        if is_direct_child(root, &to) {
            mapped.push(LocalEvent::Created(to));
        }
        return mapped;
    }

    let paths = event
        .paths
        .into_iter()
        .filter(|path| is_direct_child(root, path));
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(LocalEvent::Created).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(LocalEvent::Deleted).collect()
        }
        // Backends that cannot tell rename halves apart report `Any`.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .map(|path| {
                if path.exists() {
                    LocalEvent::Created(path)
                } else {
                    LocalEvent::Deleted(path)
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn is_direct_child(root: &Path, path: &Path) -> bool {
    if path.parent() != Some(root) {
        return false;
    }
    path.file_name()
        .map(|name| !is_partial_name(&name.to_string_lossy()))
        .unwrap_or(false)
}
