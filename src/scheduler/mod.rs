//! Scheduler module for background maintenance of the datasets.

mod checkpoint;
mod retention;

pub use checkpoint::*;
pub use retention::*;

use crate::db::DataSetRegistry;
use crate::persistence::PersistenceManager;

use std::sync::Arc;
use std::time::Duration;

/// Owns the background tasks that run while serving.
pub struct Scheduler {
    retention_manager: RetentionManager,
    checkpoint_manager: CheckpointManager,
}

impl Scheduler {
    pub fn new(
        registry: Arc<DataSetRegistry>,
        persistence: Arc<PersistenceManager>,
        retention_sweep_interval: Duration,
        checkpoint_interval: Duration,
    ) -> Self {
        Self {
            retention_manager: RetentionManager::new(registry, retention_sweep_interval),
            checkpoint_manager: CheckpointManager::new(persistence, checkpoint_interval),
        }
    }

    /// Start the retention and checkpoint managers.
    pub fn start(&self) {
        tracing::info!("Starting scheduler");
        self.retention_manager.start();
        self.checkpoint_manager.start();
    }

    /// Stop all background tasks. Safe to call more than once.
    pub fn stop(&self) {
        self.retention_manager.stop();
        self.checkpoint_manager.stop();
    }
}
