//! Progress reporting module for the indexer
//!
//! Progress is reported to external callers as JSON lines on stderr.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::models::ScanSummary;
use crate::scanner::ScanState;

/// Scan phase indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    /// Directories are still being listed
    #[default]
    Scan,
    /// Only probes are outstanding
    Probe,
    /// Nothing outstanding, waiting for changes
    Idle,
    /// The loop has stopped
    Done,
}

impl ScanPhase {
    /// Phase matching the coordinator counters
    pub fn from_state(state: &ScanState) -> Self {
        if state.stopped {
            ScanPhase::Done
        } else if state.pending_dirs > 0 {
            ScanPhase::Scan
        } else if state.pending_probes > 0 {
            ScanPhase::Probe
        } else {
            ScanPhase::Idle
        }
    }
}

/// Start message sent when the indexer begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    pub root: String,
    pub force: bool,
    pub quit_on_idle: bool,
    pub watch: bool,
}

impl StartMessage {
    pub fn new(seq: u64, ts: u64, config: &ScanConfig) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            root: config.root.to_string_lossy().to_string(),
            force: config.force_rescan,
            quit_on_idle: config.quit_on_idle,
            watch: config.watch,
        }
    }
}

/// Progress message sent while work is outstanding
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub phase: ScanPhase,
    /// Directory listings outstanding
    #[serde(rename = "pd")]
    pub pending_dirs: u64,
    /// Probes outstanding
    #[serde(rename = "pp")]
    pub pending_probes: u64,
    /// Files seen so far
    #[serde(rename = "f")]
    pub files: u64,
    /// Directories fully listed
    #[serde(rename = "d")]
    pub dirs: u64,
    #[serde(rename = "ok")]
    pub probes_succeeded: u64,
    #[serde(rename = "ko")]
    pub probes_failed: u64,
    /// Directory whose page was just handled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl ProgressMessage {
    pub fn new(
        seq: u64,
        ts: u64,
        state: &ScanState,
        summary: &ScanSummary,
        dir: Option<String>,
    ) -> Self {
        Self {
            msg_type: "p",
            seq,
            ts,
            phase: ScanPhase::from_state(state),
            pending_dirs: state.pending_dirs,
            pending_probes: state.pending_probes,
            files: summary.files_seen,
            dirs: summary.dirs_listed,
            probes_succeeded: summary.probes_succeeded,
            probes_failed: summary.probes_failed,
            dir,
        }
    }
}

/// Error message sent when a file or directory could not be handled
#[derive(Debug, Clone, Serialize)]
pub struct ErrorProgressMessage {
    /// Message type identifier ("err" for error)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorProgressMessage {
    pub fn new(seq: u64, ts: u64, error: &ScanError) -> Self {
        Self {
            msg_type: "err",
            seq,
            ts,
            error_type: format!("{:?}", error.kind),
            message: error.message.clone(),
            path: error.path.as_ref().map(|p| p.to_string_lossy().to_string()),
        }
    }
}

/// Done message sent when the loop stops
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    #[serde(rename = "tf")]
    pub total_files: u64,
    #[serde(rename = "td")]
    pub total_dirs: u64,
    #[serde(rename = "nf")]
    pub new_files: u64,
    #[serde(rename = "mf")]
    pub modified_files: u64,
    #[serde(rename = "df")]
    pub deleted_files: u64,
    /// Failed probes plus failed listings
    #[serde(rename = "ec")]
    pub error_count: u64,
    #[serde(rename = "rs")]
    pub rescans: u64,
    pub ms: u64,
}

impl DoneMessage {
    pub fn new(seq: u64, ts: u64, summary: &ScanSummary) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            total_files: summary.files_seen,
            total_dirs: summary.dirs_listed,
            new_files: summary.new_files,
            modified_files: summary.changed_files,
            deleted_files: summary.deleted_files,
            error_count: summary.probes_failed + summary.listing_errors,
            rescans: summary.rescans,
            ms: summary.duration_ms,
        }
    }
}

/// Progress reporter writing JSON lines to stderr
///
/// Handles throttling and sequence numbers. Start, error and done messages
/// are never throttled.
pub struct ProgressReporter {
    enabled: bool,
    /// Minimum interval between progress messages in milliseconds
    interval_ms: u64,
    last_report: std::cell::Cell<Instant>,
    seq: AtomicU64,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            interval_ms,
            last_report: std::cell::Cell::new(now),
            seq: AtomicU64::new(0),
            start_time: now,
        }
    }

    /// Reporter that never writes anything
    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    /// Returns true if the interval has elapsed since the last progress message.
    pub fn should_report(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let elapsed = self.last_report.get().elapsed().as_millis() as u64;
        elapsed >= self.interval_ms
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            let mut stderr = std::io::stderr().lock();
            writeln!(stderr, "{}", json).ok();
            stderr.flush().ok();
        }
    }

    pub fn report_start(&self, config: &ScanConfig) {
        if !self.enabled {
            return;
        }
        let msg = StartMessage::new(self.next_seq(), self.current_timestamp(), config);
        self.output_to_stderr(&msg);
    }

    /// Report the coordinator counters.
    ///
    /// Returns true if a message was actually sent (respects interval timing).
    pub fn report_progress(
        &self,
        state: &ScanState,
        summary: &ScanSummary,
        dir: Option<&std::path::Path>,
    ) -> bool {
        if !self.should_report() {
            return false;
        }

        let msg = ProgressMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            state,
            summary,
            dir.map(|d| d.to_string_lossy().to_string()),
        );
        self.output_to_stderr(&msg);
        self.last_report.set(Instant::now());
        true
    }

    pub fn report_error(&self, error: &ScanError) {
        if !self.enabled {
            return;
        }
        let msg = ErrorProgressMessage::new(self.next_seq(), self.current_timestamp(), error);
        self.output_to_stderr(&msg);
    }

    pub fn report_done(&self, summary: &ScanSummary) {
        if !self.enabled {
            return;
        }
        let msg = DoneMessage::new(self.next_seq(), self.current_timestamp(), summary);
        self.output_to_stderr(&msg);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
