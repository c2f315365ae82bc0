//! Scan coordinator - drives traversal, probing and change handling
//!
//! Every asynchronous result (listing page, probe outcome, watch event,
//! signal) reaches the coordinator as a [`LoopEvent`] on the loop thread,
//! so the counters and the database are only ever touched from there.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::config::ScanConfig;
use crate::db::IndexDatabase;
use crate::error::{Result, ScanError};
use crate::listing::{list_directory, EntryKind, ListedEntry};
use crate::models::ScanSummary;
use crate::progress::ProgressReporter;
use crate::prober::{MediaProber, ProbeOutcome};
use crate::signals::Trigger;
use crate::watcher::{WatchEvent, WatchEventKind};

/// Messages handled by the run loop
#[derive(Debug)]
pub enum LoopEvent {
    /// One page of a directory listing. An empty page ends the listing.
    Listing {
        dir: PathBuf,
        page: Result<Vec<ListedEntry>>,
    },
    Probed(ProbeOutcome),
    Watch(WatchEvent),
    Trigger(Trigger),
    /// Stop the loop now
    Stop,
}

/// Coordinator counters and flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanState {
    /// Directory listings requested but not finished
    pub pending_dirs: u64,
    /// Probes submitted but not completed
    pub pending_probes: u64,
    pub force_rescan: bool,
    pub quit_on_idle: bool,
    pub signal_received: bool,
    pub stopped: bool,
}

impl ScanState {
    /// No listing and no probe outstanding
    pub fn is_quiescent(&self) -> bool {
        self.pending_dirs == 0 && self.pending_probes == 0
    }

    pub fn should_quit(&self) -> bool {
        self.quit_on_idle && self.is_quiescent()
    }
}

/// Files sighted during one full traversal of the root
#[derive(Debug, Default)]
struct Traversal {
    /// `(dirname, basename)` pairs
    seen: HashSet<(String, String)>,
    /// A listing failed, so unseen files may still exist
    failed: bool,
}

/// Keeps the index in sync with the media root
pub struct ScanCoordinator<P: MediaProber> {
    root: PathBuf,
    db: IndexDatabase,
    prober: P,
    events: UnboundedSender<LoopEvent>,
    page_size: usize,
    configured_force: bool,
    state: ScanState,
    traversal: Option<Traversal>,
    summary: ScanSummary,
    progress: ProgressReporter,
}

impl<P: MediaProber> ScanCoordinator<P> {
    /// `root` must already be canonical: stored paths are relative to it.
    pub fn new(
        root: PathBuf,
        db: IndexDatabase,
        prober: P,
        events: UnboundedSender<LoopEvent>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            root,
            db,
            prober,
            events,
            page_size: config.effective_page_size(),
            configured_force: config.force_rescan,
            state: ScanState {
                force_rescan: config.force_rescan,
                quit_on_idle: config.quit_on_idle,
                ..Default::default()
            },
            traversal: None,
            summary: ScanSummary::new(),
            progress: ProgressReporter::new(config.show_progress, config.progress_interval_ms),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    pub fn database(&self) -> &IndexDatabase {
        &self.db
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped
    }

    pub fn into_summary(self) -> ScanSummary {
        self.summary
    }

    /// Start the initial traversal of the root.
    ///
    /// Must run inside a `LocalSet`: probes are spawned as local tasks.
    pub fn start(&mut self) {
        info!(
            "Scanning {} (force: {}, quit on idle: {})",
            self.root.display(),
            self.state.force_rescan,
            self.state.quit_on_idle
        );
        self.begin_traversal();
    }

    /// Apply one loop event. Only fatal errors are returned.
    pub fn handle(&mut self, event: LoopEvent) -> Result<()> {
        let mut listed = None;
        let result = match event {
            LoopEvent::Listing { dir, page } => {
                let handled = self.on_directory_page(&dir, page);
                listed = Some(dir);
                handled
            }
            LoopEvent::Probed(outcome) => self.on_probed(outcome),
            LoopEvent::Watch(change) => self.on_changed(change),
            LoopEvent::Trigger(trigger) => {
                self.on_trigger(trigger);
                Ok(())
            }
            LoopEvent::Stop => {
                self.stop();
                Ok(())
            }
        };
        self.progress
            .report_progress(&self.state, &self.summary, listed.as_deref());
        result
    }

    /// React to an external trigger. Returns true if a traversal was started.
    pub fn on_trigger(&mut self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Liveness => {
                debug!(
                    "Alive: {} dirs and {} probes pending",
                    self.state.pending_dirs, self.state.pending_probes
                );
                false
            }
            Trigger::Rescan => {
                if self.state.pending_dirs > 0 {
                    info!("Scan already in progress, ignoring rescan request");
                    return false;
                }
                info!("Rescan requested");
                self.state.signal_received = true;
                self.state.force_rescan = true;
                self.summary.rescans += 1;
                self.begin_traversal();
                true
            }
        }
    }

    /// Halt the prober and let the loop exit.
    pub fn stop(&mut self) {
        if self.state.stopped {
            return;
        }
        self.state.stopped = true;
        self.prober.stop();
    }

    fn begin_traversal(&mut self) {
        self.state.pending_dirs += 1;
        self.traversal = Some(Traversal::default());
        self.enumerate(self.root.clone());
    }

    fn enumerate(&self, dir: PathBuf) {
        debug!("Listing {}", dir.display());
        let events = self.events.clone();
        let page_size = self.page_size;
        tokio::task::spawn_blocking(move || {
            list_directory(&dir, page_size, |page| {
                events
                    .send(LoopEvent::Listing {
                        dir: dir.clone(),
                        page,
                    })
                    .is_ok()
            });
        });
    }

    fn on_directory_page(&mut self, dir: &Path, page: Result<Vec<ListedEntry>>) -> Result<()> {
        let entries = match page {
            Err(e) => {
                warn!("Cannot list {}: {}", dir.display(), e.message);
                self.progress.report_error(&e);
                self.summary.listing_errors += 1;
                if let Some(traversal) = self.traversal.as_mut() {
                    traversal.failed = true;
                }
                return self.dir_done();
            }
            Ok(entries) if entries.is_empty() => {
                self.summary.dirs_listed += 1;
                return self.dir_done();
            }
            Ok(entries) => entries,
        };

        for entry in entries {
            match entry.kind {
                EntryKind::Directory => {
                    self.state.pending_dirs += 1;
                    self.enumerate(entry.path);
                }
                EntryKind::File { mtime } => {
                    let discovered = self.discover_file(&entry.path, mtime);
                    self.tolerate(discovered)?;
                }
                EntryKind::Other => debug!("Skipping {}", entry.path.display()),
                EntryKind::Unreadable => {
                    // Could be a file or a whole subtree; its rows must outlive this traversal
                    warn!("Cannot examine {}", entry.path.display());
                    self.summary.listing_errors += 1;
                    if let Some(traversal) = self.traversal.as_mut() {
                        traversal.failed = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn dir_done(&mut self) -> Result<()> {
        self.state.pending_dirs = self.state.pending_dirs.saturating_sub(1);
        if self.state.pending_dirs == 0 {
            debug!("No more dirs");
            self.finish_traversal()?;
        }
        self.check_quit();
        Ok(())
    }

    fn finish_traversal(&mut self) -> Result<()> {
        if let Some(traversal) = self.traversal.take() {
            if traversal.failed {
                warn!("Traversal of {} was incomplete, keeping unseen files", self.root.display());
            } else {
                self.prune_unseen(&traversal.seen)?;
            }
            info!("Traversal of {} complete", self.root.display());
        }
        self.state.force_rescan = self.configured_force;
        Ok(())
    }

    fn prune_unseen(&mut self, seen: &HashSet<(String, String)>) -> Result<()> {
        for file in self.db.all_files()? {
            if seen.contains(&(file.path.clone(), file.name.clone())) {
                continue;
            }
            info!("Removing vanished file {}", join_relative(&file.path, &file.name));
            if self.db.delete_file(file.id)? {
                self.summary.deleted_files += 1;
            }
        }
        Ok(())
    }

    /// Create or update the row for a regular file and probe it if needed.
    fn discover_file(&mut self, path: &Path, mtime: DateTime<Utc>) -> Result<()> {
        let (dirname, basename) = relative_parts(&self.root, path)?;
        self.summary.files_seen += 1;

        let needs_probe = match self.db.find_file(&basename, &dirname)? {
            None => {
                let id = self.db.insert_file(&basename, &dirname, mtime)?;
                debug!("New file {} ({})", path.display(), id);
                self.summary.new_files += 1;
                true
            }
            Some(record) if record.mtime != mtime => {
                debug!("Changed file {} ({} -> {})", path.display(), record.mtime, mtime);
                self.db.update_file_mtime(record.id, mtime)?;
                self.summary.changed_files += 1;
                true
            }
            Some(_) => self.state.force_rescan,
        };

        if let Some(traversal) = self.traversal.as_mut() {
            traversal.seen.insert((dirname, basename));
        }
        if needs_probe {
            self.submit_probe(path)?;
        }
        Ok(())
    }

    fn submit_probe(&mut self, path: &Path) -> Result<()> {
        let uri = Url::from_file_path(path)
            .map_err(|()| ScanError::invalid_path(path.to_path_buf(), "Cannot build file URI"))?;

        self.state.pending_probes += 1;
        self.summary.probes_dispatched += 1;
        debug!("Probing {}", uri);

        let probe = self.prober.probe(uri.clone());
        let events = self.events.clone();
        tokio::task::spawn_local(async move {
            let result = probe.await;
            let _ = events.send(LoopEvent::Probed(ProbeOutcome { uri, result }));
        });
        Ok(())
    }

    fn on_probed(&mut self, outcome: ProbeOutcome) -> Result<()> {
        self.state.pending_probes = self.state.pending_probes.saturating_sub(1);
        if self.state.pending_probes == 0 {
            debug!("No more probes");
        }
        let stored = self.store_probe(outcome);
        let stored = self.tolerate(stored);
        self.check_quit();
        stored
    }

    fn store_probe(&mut self, outcome: ProbeOutcome) -> Result<()> {
        let ProbeOutcome { uri, result } = outcome;
        let path = uri
            .to_file_path()
            .map_err(|()| ScanError::invalid_path(PathBuf::from(uri.path()), "Not a file URI"))?;
        let (dirname, basename) = relative_parts(&self.root, &path)?;

        let Some(file) = self.db.find_file(&basename, &dirname)? else {
            warn!("{} vanished before its probe completed", path.display());
            return Ok(());
        };

        match result {
            Ok(info) => {
                let info_id = self.db.replace_info(file.id, &info)?;
                debug!("Stored info {} for {}", info_id, path.display());
                self.summary.probes_succeeded += 1;
            }
            Err(e) => {
                error!("Failed to probe {}: {}", path.display(), e.message);
                self.progress.report_error(&e);
                self.db.record_error(file.id, &e.message)?;
                self.summary.probes_failed += 1;
            }
        }
        Ok(())
    }

    fn on_changed(&mut self, change: WatchEvent) -> Result<()> {
        let applied = match change.kind {
            WatchEventKind::Created { mtime } => self.discover_file(&change.path, mtime),
            WatchEventKind::Deleted => self.forget_file(&change.path),
            WatchEventKind::Other => {
                debug!("Ignoring change on {}", change.path.display());
                Ok(())
            }
        };
        self.tolerate(applied)
    }

    fn forget_file(&mut self, path: &Path) -> Result<()> {
        let (dirname, basename) = relative_parts(&self.root, path)?;
        if let Some(traversal) = self.traversal.as_mut() {
            traversal.seen.remove(&(dirname.clone(), basename.clone()));
        }
        if let Some(file) = self.db.find_file(&basename, &dirname)? {
            info!("Removing deleted file {}", path.display());
            self.db.delete_file(file.id)?;
            self.summary.deleted_files += 1;
        }
        Ok(())
    }

    fn check_quit(&mut self) {
        if !self.state.stopped && self.state.should_quit() {
            info!("Nothing left to do, stopping");
            self.stop();
        }
    }

    /// Log and swallow non-fatal errors
    fn tolerate(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if !e.is_fatal() => {
                warn!("{}", e);
                self.progress.report_error(&e);
                Ok(())
            }
            other => other,
        }
    }
}

/// Split `path` into its directory relative to `root` and its file name.
///
/// Files directly under the root have an empty directory. Separators are
/// always `/`.
pub fn relative_parts(root: &Path, path: &Path) -> Result<(String, String)> {
    let relative = path.strip_prefix(root).map_err(|_| {
        ScanError::invalid_path(
            path.to_path_buf(),
            format!("Not under {}", root.display()),
        )
    })?;
    let basename = relative
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ScanError::invalid_path(path.to_path_buf(), "No valid file name"))?;
    let dirname = match relative.parent() {
        Some(parent) => parent
            .to_str()
            .ok_or_else(|| ScanError::invalid_path(path.to_path_buf(), "Directory is not UTF-8"))?
            .replace('\\', "/"),
        None => String::new(),
    };
    Ok((dirname, basename.to_string()))
}

fn join_relative(dirname: &str, basename: &str) -> String {
    if dirname.is_empty() {
        basename.to_string()
    } else {
        format!("{}/{}", dirname, basename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanErrorKind;
    use crate::models::normalize_mtime;
    use crate::prober::testing::FakeProber;
    use proptest::prelude::*;
    use std::fs;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use tokio::task::LocalSet;

    fn coordinator(
        root: &Path,
        prober: FakeProber,
        config: ScanConfig,
    ) -> (ScanCoordinator<FakeProber>, UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = unbounded_channel();
        let db = IndexDatabase::open_memory(root).unwrap();
        (
            ScanCoordinator::new(root.to_path_buf(), db, prober, tx, &config),
            rx,
        )
    }

    fn config(root: &Path) -> ScanConfig {
        ScanConfig::builder()
            .root(root.to_path_buf())
            .watch(false)
            .handle_signals(false)
            .build()
    }

    async fn until_quiescent(
        coordinator: &mut ScanCoordinator<FakeProber>,
        rx: &mut UnboundedReceiver<LoopEvent>,
    ) {
        while !coordinator.state().is_quiescent() {
            let event = rx.recv().await.unwrap();
            coordinator.handle(event).unwrap();
        }
    }

    fn file_mtime(path: &Path) -> DateTime<Utc> {
        normalize_mtime(fs::metadata(path).unwrap().modified().unwrap())
    }

    #[test]
    fn test_quiescence_predicate() {
        let mut state = ScanState::default();
        assert!(state.is_quiescent());
        assert!(!state.should_quit());

        state.quit_on_idle = true;
        assert!(state.should_quit());
        state.pending_probes = 1;
        assert!(!state.should_quit());
        state.pending_probes = 0;
        state.pending_dirs = 2;
        assert!(!state.is_quiescent());
    }

    #[test]
    fn test_liveness_trigger_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, _rx) = coordinator(dir.path(), FakeProber::new(), config(dir.path()));
        coordinator.state.pending_dirs = 3;
        let before = coordinator.state().clone();

        assert!(!coordinator.on_trigger(Trigger::Liveness));
        assert_eq!(coordinator.state(), &before);

        coordinator.state.pending_dirs = 0;
        assert!(!coordinator.on_trigger(Trigger::Liveness));
        assert!(!coordinator.state().signal_received);
        assert_eq!(coordinator.summary().rescans, 0);
    }

    #[test]
    fn test_rescan_ignored_while_listing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut coordinator, _rx) = coordinator(dir.path(), FakeProber::new(), config(dir.path()));
        coordinator.state.pending_dirs = 1;

        assert!(!coordinator.on_trigger(Trigger::Rescan));
        assert!(!coordinator.state().signal_received);
        assert!(!coordinator.state().force_rescan);
        assert_eq!(coordinator.state().pending_dirs, 1);
    }

    #[tokio::test]
    async fn test_rescan_trigger_forces_probes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("a.mp4"), b"a").unwrap();
        let prober = FakeProber::new();
        let (mut coordinator, mut rx) = coordinator(&root, prober.clone(), config(&root));

        LocalSet::new()
            .run_until(async {
                coordinator.start();
                until_quiescent(&mut coordinator, &mut rx).await;
                assert_eq!(prober.calls(), vec!["a.mp4"]);

                // Probes still running do not block a rescan
                coordinator.state.pending_probes = 1;
                assert!(coordinator.on_trigger(Trigger::Rescan));
                coordinator.state.pending_probes = 0;
                assert!(coordinator.state().signal_received);
                assert!(coordinator.state().force_rescan);
                assert_eq!(coordinator.state().pending_dirs, 1);

                until_quiescent(&mut coordinator, &mut rx).await;
            })
            .await;

        assert_eq!(prober.calls(), vec!["a.mp4", "a.mp4"]);
        assert!(!coordinator.state().force_rescan);
        assert!(coordinator.state().signal_received);
        assert_eq!(coordinator.summary().rescans, 1);
        assert!(!coordinator.is_stopped());
    }

    #[tokio::test]
    async fn test_quit_on_idle_stops_prober() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir(root.join("tv")).unwrap();
        fs::write(root.join("tv").join("e01.mkv"), b"e").unwrap();
        fs::write(root.join("bad.avi"), b"x").unwrap();
        let prober = FakeProber::new();
        let mut config = config(&root);
        config.quit_on_idle = true;
        config.page_size = 1;
        let (mut coordinator, mut rx) = coordinator(&root, prober.clone(), config);

        LocalSet::new()
            .run_until(async {
                coordinator.start();
                while !coordinator.is_stopped() {
                    let event = rx.recv().await.unwrap();
                    coordinator.handle(event).unwrap();
                }
            })
            .await;

        assert!(prober.is_stopped());
        let summary = coordinator.summary();
        assert_eq!(summary.dirs_listed, 2);
        assert_eq!(summary.new_files, 2);
        assert_eq!(summary.probes_succeeded, 1);
        assert_eq!(summary.probes_failed, 1);

        let db = coordinator.database();
        let episode = db.find_file("e01.mkv", "tv").unwrap().unwrap();
        assert!(db.info_for_file(episode.id).unwrap().is_some());
        let bad = db.find_file("bad.avi", "").unwrap().unwrap();
        assert_eq!(db.errors_for_file(bad.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_events_update_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let prober = FakeProber::new();
        let (mut coordinator, mut rx) = coordinator(&root, prober.clone(), config(&root));

        let path = root.join("new.mp4");
        fs::write(&path, b"n").unwrap();
        let mtime = file_mtime(&path);

        LocalSet::new()
            .run_until(async {
                coordinator
                    .handle(LoopEvent::Watch(WatchEvent {
                        kind: WatchEventKind::Created { mtime },
                        path: path.clone(),
                    }))
                    .unwrap();
                assert_eq!(coordinator.state().pending_probes, 1);
                assert_eq!(coordinator.state().pending_dirs, 0);
                until_quiescent(&mut coordinator, &mut rx).await;
            })
            .await;

        let file = coordinator.database().find_file("new.mp4", "").unwrap().unwrap();
        assert_eq!(file.mtime, mtime);
        assert!(coordinator.database().info_for_file(file.id).unwrap().is_some());

        coordinator
            .handle(LoopEvent::Watch(WatchEvent {
                kind: WatchEventKind::Deleted,
                path: path.clone(),
            }))
            .unwrap();
        assert!(coordinator.database().find_file("new.mp4", "").unwrap().is_none());
        assert_eq!(coordinator.database().row_counts().unwrap().streams, 0);

        // Unknown changes and paths outside the root are ignored
        coordinator
            .handle(LoopEvent::Watch(WatchEvent {
                kind: WatchEventKind::Other,
                path: path.clone(),
            }))
            .unwrap();
        coordinator
            .handle(LoopEvent::Watch(WatchEvent {
                kind: WatchEventKind::Deleted,
                path: PathBuf::from("/elsewhere/a.mp4"),
            }))
            .unwrap();
        assert_eq!(coordinator.summary().deleted_files, 1);
        assert_eq!(prober.calls(), vec!["new.mp4"]);
    }

    #[test]
    fn test_failed_listing_keeps_unseen_rows() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (mut coordinator, _rx) = coordinator(&root, FakeProber::new(), config(&root));
        let mtime = normalize_mtime(std::time::SystemTime::now());
        coordinator.db.insert_file("gone.mp4", "old", mtime).unwrap();

        coordinator.state.pending_dirs = 1;
        coordinator.traversal = Some(Traversal::default());
        coordinator
            .handle(LoopEvent::Listing {
                dir: root.join("old"),
                page: Err(ScanError::filesystem(Some(root.join("old")), "Permission denied")),
            })
            .unwrap();

        assert_eq!(coordinator.state().pending_dirs, 0);
        assert_eq!(coordinator.summary().listing_errors, 1);
        assert_eq!(coordinator.database().file_count().unwrap(), 1);
    }

    #[test]
    fn test_complete_traversal_prunes_unseen_rows() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (mut coordinator, _rx) = coordinator(&root, FakeProber::new(), config(&root));
        let mtime = normalize_mtime(std::time::SystemTime::now());
        let gone = coordinator.db.insert_file("gone.mp4", "old", mtime).unwrap();
        coordinator.db.record_error(gone, "broken").unwrap();

        coordinator.state.pending_dirs = 1;
        coordinator.traversal = Some(Traversal::default());
        coordinator
            .handle(LoopEvent::Listing {
                dir: root.clone(),
                page: Ok(Vec::new()),
            })
            .unwrap();

        assert!(coordinator.traversal.is_none());
        assert_eq!(coordinator.summary().deleted_files, 1);
        let counts = coordinator.database().row_counts().unwrap();
        assert_eq!((counts.files, counts.errors), (0, 0));
    }

    #[test]
    fn test_unreadable_entry_keeps_its_row() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (mut coordinator, _rx) = coordinator(&root, FakeProber::new(), config(&root));
        let mtime = normalize_mtime(std::time::SystemTime::now());
        coordinator.db.insert_file("x.mp4", "d", mtime).unwrap();

        coordinator.state.pending_dirs = 1;
        coordinator.traversal = Some(Traversal::default());
        coordinator
            .handle(LoopEvent::Listing {
                dir: root.join("d"),
                page: Ok(vec![ListedEntry {
                    path: root.join("d").join("x.mp4"),
                    kind: EntryKind::Unreadable,
                }]),
            })
            .unwrap();
        coordinator
            .handle(LoopEvent::Listing {
                dir: root.join("d"),
                page: Ok(Vec::new()),
            })
            .unwrap();

        assert!(coordinator.traversal.is_none());
        assert_eq!(coordinator.state().pending_dirs, 0);
        assert_eq!(coordinator.summary().deleted_files, 0);
        assert_eq!(coordinator.summary().listing_errors, 1);
        assert!(coordinator.database().find_file("x.mp4", "d").unwrap().is_some());
    }

    #[test]
    fn test_relative_parts() {
        let root = Path::new("/srv/media");
        assert_eq!(
            relative_parts(root, Path::new("/srv/media/a.mp4")).unwrap(),
            (String::new(), "a.mp4".to_string())
        );
        assert_eq!(
            relative_parts(root, Path::new("/srv/media/tv/show/e01.mkv")).unwrap(),
            ("tv/show".to_string(), "e01.mkv".to_string())
        );

        let err = relative_parts(root, Path::new("/srv/other/a.mp4")).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::InvalidPath);
        assert!(relative_parts(root, root).is_err());
    }

    proptest! {
        #[test]
        fn prop_relative_parts_round_trip(
            dirs in prop::collection::vec("[a-zA-Z0-9 _.-]{1,8}", 0..4),
            name in "[a-zA-Z0-9_-]{1,12}\\.mp4",
        ) {
            prop_assume!(dirs.iter().all(|d| d != "." && d != ".."));
            let root = Path::new("/media");
            let mut path = root.to_path_buf();
            for d in &dirs {
                path.push(d);
            }
            path.push(&name);

            let (dirname, basename) = relative_parts(root, &path).unwrap();
            prop_assert_eq!(&basename, &name);
            prop_assert_eq!(dirname, dirs.join("/"));
            prop_assert_eq!(join_relative(&dirs.join("/"), &name), path.strip_prefix(root).unwrap().to_str().unwrap());
        }
    }
}
