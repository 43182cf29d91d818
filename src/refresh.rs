//! Background deal refresh
//!
//! Runs an initial refresh right after startup and, optionally, a forced full
//! refresh on a fixed interval. Shutting down abandons any refresh in progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tracker::DealTracker;

/// Configuration for background refreshes
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Refresh once as soon as the task starts
    pub warmup: bool,
    /// Interval for periodic forced refreshes, if any
    pub interval: Option<Duration>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            warmup: true,
            interval: None,
        }
    }
}

impl RefreshConfig {
    fn is_idle(&self) -> bool {
        !self.warmup && self.interval.is_none()
    }
}

/// Handle for controlling the background refresh task
pub struct RefreshHandle {
    /// Signals the task to stop
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Spawns the background refresh task
    ///
    /// Dropping the handle also stops the task, so keep it alive for as long
    /// as refreshes should run.
    pub fn spawn(tracker: Arc<DealTracker>, config: RefreshConfig) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = (!config.is_idle()).then(|| {
            tokio::spawn(async move {
                tokio::select! {
                    _ = run(&tracker, config) => {}
                    _ = shutdown_rx.recv() => {
                        debug!("Background refresh stopped");
                    }
                }
            })
        });

        Self { shutdown_tx, task }
    }

    /// Stops the background task and waits for it to finish
    ///
    /// A refresh in progress is dropped at its next await point. Snapshots it
    /// already stored stay cached, but the refresh time is not updated.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn run(tracker: &DealTracker, config: RefreshConfig) {
    if config.warmup {
        info!("Loading initial deal data");
        refresh_once(tracker).await;
    }

    let Some(period) = config.interval else {
        return;
    };
    let mut interval = tokio::time::interval(period);
    // Skip the first tick (immediate)
    interval.tick().await;

    loop {
        interval.tick().await;
        refresh_once(tracker).await;
    }
}

async fn refresh_once(tracker: &DealTracker) {
    match tracker.force_refresh().await {
        Ok(listing) => info!(deals = listing.deals.len(), "Background refresh finished"),
        Err(e) => warn!(error = %e, "Background refresh failed"),
    }
}
