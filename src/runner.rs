//! Run loop hosting the coordinator, the change monitor and signal handlers

use log::{error, info, warn};
use std::time::Instant;
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::LocalSet;

use crate::config::ScanConfig;
use crate::db::IndexDatabase;
use crate::error::{Result, ScanError};
use crate::models::ScanSummary;
use crate::prober::MediaProber;
use crate::scanner::ScanCoordinator;
use crate::signals;
use crate::watcher::ChangeMonitor;

/// A configured indexer, ready to run
pub struct Indexer<P: MediaProber> {
    config: ScanConfig,
    db: IndexDatabase,
    prober: P,
}

impl<P: MediaProber> Indexer<P> {
    /// Validate the configuration and open its database
    pub fn open(config: ScanConfig, prober: P) -> Result<Self> {
        let config = canonical(config)?;
        let db = IndexDatabase::open(&config.database, &config.root)?;
        Ok(Self { config, db, prober })
    }

    /// Use an already opened database
    pub fn new(config: ScanConfig, db: IndexDatabase, prober: P) -> Result<Self> {
        Ok(Self {
            config: canonical(config)?,
            db,
            prober,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run until the loop is stopped: on quiescence when quitting on idle,
    /// or on interrupt.
    pub async fn run(self) -> Result<ScanSummary> {
        LocalSet::new().run_until(self.run_local()).await
    }

    async fn run_local(self) -> Result<ScanSummary> {
        let started = Instant::now();
        let Self { config, db, prober } = self;
        let (tx, mut rx) = unbounded_channel();

        let _monitor = if config.watch {
            match ChangeMonitor::start(&config.root, tx.clone()) {
                Ok(monitor) => Some(monitor),
                Err(e) if !e.is_fatal() => {
                    warn!("Change monitoring unavailable: {}", e);
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };
        let _signals = if config.handle_signals {
            Some(signals::listen(tx.clone())?)
        } else {
            None
        };

        let mut coordinator = ScanCoordinator::new(config.root.clone(), db, prober, tx, &config);
        coordinator.progress().report_start(&config);
        coordinator.start();

        while !coordinator.is_stopped() {
            let Some(event) = rx.recv().await else {
                break;
            };
            if let Err(e) = coordinator.handle(event) {
                error!("Stopping on fatal error: {}", e);
                coordinator.progress().report_error(&e);
                coordinator.stop();
                return Err(e);
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        coordinator.progress().report_done(&ScanSummary {
            duration_ms,
            ..coordinator.summary().clone()
        });
        let mut summary = coordinator.into_summary();
        summary.duration_ms = duration_ms;
        info!(
            "Indexed {} files ({} new, {} changed, {} removed) in {}ms",
            summary.files_seen,
            summary.new_files,
            summary.changed_files,
            summary.deleted_files,
            summary.duration_ms
        );
        Ok(summary)
    }
}

fn canonical(mut config: ScanConfig) -> Result<ScanConfig> {
    config.validate()?;
    config.root = config.root.canonicalize().map_err(|e| {
        ScanError::config(format!("Cannot resolve root {}: {}", config.root.display(), e))
    })?;
    Ok(config)
}
