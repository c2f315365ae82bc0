//! Process signal handling
//!
//! SIGUSR1 requests a forced rescan, SIGUSR2 is a liveness probe and an
//! interrupt stops the loop. Each signal is turned into a [`LoopEvent`] so
//! the coordinator handles it on the loop like any other event.

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::error::{Result, ScanError};
use crate::scanner::LoopEvent;

/// Externally triggered coordinator actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Re-traverse the whole root, probing every file
    Rescan,
    /// Answer "still alive" without touching any state
    Liveness,
}

/// Installed signal handlers. Dropping the listener uninstalls them.
pub struct SignalListener {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Install the handlers. Must be called from within the runtime.
pub fn listen(events: UnboundedSender<LoopEvent>) -> Result<SignalListener> {
    let mut tasks = Vec::with_capacity(3);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, trigger) in [
            (SignalKind::user_defined1(), Trigger::Rescan),
            (SignalKind::user_defined2(), Trigger::Liveness),
        ] {
            let mut stream = signal(kind)
                .map_err(|e| ScanError::config(format!("Cannot install signal handler: {}", e)))?;
            let events = events.clone();
            tasks.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    debug!("Received signal for {:?}", trigger);
                    if events.send(LoopEvent::Trigger(trigger)).is_err() {
                        break;
                    }
                }
            }));
        }
    }

    tasks.push(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            let _ = events.send(LoopEvent::Stop);
        }
    }));

    Ok(SignalListener { tasks })
}
