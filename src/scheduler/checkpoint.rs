//! Checkpoint manager for periodic snapshot saves.
//!
//! Signals that cannot be intercepted skip the shutdown save, so a
//! checkpoint bounds how much history such a kill can lose.

use crate::persistence::{Lifecycle, PersistenceManager};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Manager for saving all datasets on a fixed period.
pub struct CheckpointManager {
    persistence: Arc<PersistenceManager>,
    period: Duration,
    stop: broadcast::Sender<()>,
}

impl CheckpointManager {
    pub fn new(persistence: Arc<PersistenceManager>, period: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            persistence,
            period,
            stop,
        }
    }

    /// Start the checkpoint background task. A zero period disables it.
    pub fn start(&self) {
        if self.period.is_zero() {
            tracing::info!("CheckpointManager: Disabled");
            return;
        }

        let persistence = self.persistence.clone();
        let period = self.period;
        let mut rx = self.stop.subscribe();

        tokio::spawn(async move {
            // Data was just loaded; the first save is one period away.
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_checkpoint(&persistence).await;
                    }
                }
            }
        });
    }

    /// Stop the checkpoint manager.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

/// Save every dataset unless the process has left `Serving`.
pub async fn process_checkpoint(persistence: &Arc<PersistenceManager>) -> bool {
    if persistence.state() != Lifecycle::Serving {
        return false;
    }

    let manager = persistence.clone();
    match tokio::task::spawn_blocking(move || manager.save_all()).await {
        Ok(report) => {
            tracing::debug!(
                "CheckpointManager: Saved {} pairs, {} failed",
                report.saved,
                report.failed
            );
            true
        }
        Err(e) => {
            tracing::error!("CheckpointManager: Save task failed: {}", e);
            false
        }
    }
}
