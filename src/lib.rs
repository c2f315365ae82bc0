//! Media file indexer
//!
//! Indexes a directory tree of media files into SQLite and keeps the index
//! synchronized with the filesystem: a traversal at startup, live change
//! monitoring of the root, and forced rescans on SIGUSR1.

pub mod config;
pub mod db;
pub mod error;
pub mod listing;
pub mod migrations;
pub mod models;
pub mod prober;
pub mod progress;
pub mod runner;
pub mod scanner;
pub mod signals;
pub mod watcher;

pub use config::{ConfigFile, DatabaseConfig, ScanConfig};
pub use db::IndexDatabase;
pub use error::{Result, ScanError, ScanErrorKind};
pub use models::{
    FileRecord, InfoRecord, ProbeInfo, ScanSummary, StreamNode, StreamRecord, StreamVariant,
};
pub use prober::{FfprobeProber, MediaProber, ProbeOutcome};
pub use progress::{
    DoneMessage, ErrorProgressMessage, ProgressMessage, ProgressReporter, ScanPhase, StartMessage,
};
pub use runner::Indexer;
pub use scanner::{LoopEvent, ScanCoordinator, ScanState};
pub use signals::Trigger;
pub use watcher::{ChangeMonitor, WatchEvent, WatchEventKind};
