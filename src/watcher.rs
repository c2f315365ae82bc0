//! Change monitor for the media root
//!
//! Only the root directory itself is watched. Subdirectories created later
//! are picked up by the next rescan.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;
use crate::models::normalize_mtime;
use crate::scanner::LoopEvent;

/// What happened to a path under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A regular file appeared or finished being written
    Created { mtime: DateTime<Utc> },
    Deleted,
    /// Anything the coordinator does not act upon
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    fn deleted(path: PathBuf) -> Self {
        Self {
            kind: WatchEventKind::Deleted,
            path,
        }
    }

    fn other(path: PathBuf) -> Self {
        Self {
            kind: WatchEventKind::Other,
            path,
        }
    }

    /// Classify a path that exists, or existed, after the event
    fn from_current_state(path: PathBuf) -> Self {
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => match meta.modified() {
                Ok(modified) => Self {
                    kind: WatchEventKind::Created {
                        mtime: normalize_mtime(modified),
                    },
                    path,
                },
                Err(e) => {
                    warn!("Cannot read mtime of {}: {}", path.display(), e);
                    Self::other(path)
                }
            },
            Ok(_) => Self::other(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::deleted(path),
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                Self::other(path)
            }
        }
    }
}

/// Keeps the native watcher alive. Dropping it stops monitoring.
pub struct ChangeMonitor {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ChangeMonitor {
    /// Watch `root` and forward every change to the loop.
    pub fn start(root: &Path, events: UnboundedSender<LoopEvent>) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for change in convert_notify_event(event) {
                        debug!("File watch event: {:?}", change);
                        if events.send(LoopEvent::Watch(change)).is_err() {
                            // Loop is gone, nothing left to notify
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        info!("Watching path: {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Convert a notify event into the changes the coordinator understands.
///
/// Renames are split: the source disappears and the destination appears.
/// A finished write is reported as a creation so the stored mtime is
/// compared again.
pub fn convert_notify_event(event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .map(WatchEvent::from_current_state)
            .collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(WatchEvent::deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().map(WatchEvent::deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .into_iter()
            .map(WatchEvent::from_current_state)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                changes.push(WatchEvent::deleted(from));
            }
            changes.extend(paths.map(WatchEvent::from_current_state));
            changes
        }
        // Backends that cannot tell the two ends of a rename apart
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(WatchEvent::from_current_state)
            .collect(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event
            .paths
            .into_iter()
            .map(WatchEvent::from_current_state)
            .collect(),
        _ => event.paths.into_iter().map(WatchEvent::other).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_create_of_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        fs::write(&path, b"a").unwrap();
        let mtime = normalize_mtime(fs::metadata(&path).unwrap().modified().unwrap());

        let changes =
            convert_notify_event(Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone()));
        assert_eq!(
            changes,
            vec![WatchEvent {
                kind: WatchEventKind::Created { mtime },
                path
            }]
        );
    }

    #[test]
    fn test_create_of_directory_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("season2");
        fs::create_dir(&sub).unwrap();

        let changes =
            convert_notify_event(Event::new(EventKind::Create(CreateKind::Folder)).add_path(sub));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, WatchEventKind::Other);
    }

    #[test]
    fn test_create_of_vanished_file_is_a_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp.part");
        let changes =
            convert_notify_event(Event::new(EventKind::Create(CreateKind::Any)).add_path(path));
        assert_eq!(changes[0].kind, WatchEventKind::Deleted);
    }

    #[test]
    fn test_rename_is_split() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("b.mp4");
        let to = dir.path().join("c.mp4");
        fs::write(&to, b"c").unwrap();

        let changes = convert_notify_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(from.clone())
                .add_path(to.clone()),
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0], WatchEvent::deleted(from.clone()));
        assert!(matches!(changes[1].kind, WatchEventKind::Created { .. }));
        assert_eq!(changes[1].path, to);

        let changes = convert_notify_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From))).add_path(from.clone()),
        );
        assert_eq!(changes, vec![WatchEvent::deleted(from)]);
    }

    #[test]
    fn test_remove_and_close_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");

        let changes = convert_notify_event(
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone()),
        );
        assert_eq!(changes, vec![WatchEvent::deleted(path.clone())]);

        fs::write(&path, b"a").unwrap();
        let changes = convert_notify_event(
            Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
                .add_path(path.clone()),
        );
        assert!(matches!(changes[0].kind, WatchEventKind::Created { .. }));

        // Data writes are only acted upon once the file is closed
        let changes = convert_notify_event(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path),
        );
        assert_eq!(changes[0].kind, WatchEventKind::Other);
    }

    #[tokio::test]
    async fn test_monitor_reports_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let monitor = ChangeMonitor::start(&root, tx).unwrap();
        assert_eq!(monitor.root(), root.as_path());

        let path = root.join("new.mkv");
        fs::write(&path, b"new").unwrap();

        let created = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if let LoopEvent::Watch(WatchEvent {
                    kind: WatchEventKind::Created { .. },
                    path: seen,
                }) = event
                {
                    return Some(seen);
                }
            }
            None
        })
        .await
        .unwrap();
        assert_eq!(created, Some(path));
    }
}
