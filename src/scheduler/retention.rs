//! Retention manager for evicting records from idle datasets.
//!
//! Every put already trims its own dataset; this sweep covers pairs whose
//! observers stopped reporting.

use crate::db::DataSetRegistry;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Manager for dropping records past the retention window.
pub struct RetentionManager {
    registry: Arc<DataSetRegistry>,
    period: Duration,
    stop: broadcast::Sender<()>,
}

impl RetentionManager {
    pub fn new(registry: Arc<DataSetRegistry>, period: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            registry,
            period,
            stop,
        }
    }

    /// Start the retention manager background task. A zero period disables it.
    pub fn start(&self) {
        if self.period.is_zero() {
            tracing::info!("RetentionManager: Disabled");
            return;
        }

        let registry = self.registry.clone();
        let period = self.period;
        let mut rx = self.stop.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&registry);
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

pub fn process_retention(registry: &DataSetRegistry) -> usize {
    let evicted = registry.evict_expired();
    if evicted > 0 {
        tracing::debug!("RetentionManager: Evicted {} expired records", evicted);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::db::{Observer, Record, Target, TimeRange};
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_process_retention() {
        let registry = DataSetRegistry::new(&MonitorConfig {
            targets: vec![Target {
                id: 1,
                name: "web".to_string(),
                address: String::new(),
                observers: None,
            }],
            observers: vec![Observer { id: 1, name: "tokyo".to_string() }],
            ..Default::default()
        });

        let now = Utc::now();
        let expired = now - TimeRange::MAX.duration() - ChronoDuration::hours(1);
        let ds = registry.get(1, 1).unwrap();
        // Stored as of an earlier clock so the put itself keeps it.
        ds.put_at(Record::new(expired).with_metric("cpu", 1.0), expired);
        ds.put_at(Record::new(now).with_metric("cpu", 2.0), expired);
        assert_eq!(ds.len(), 2);

        assert_eq!(process_retention(&registry), 1);
        assert_eq!(ds.len(), 1);
        assert_eq!(process_retention(&registry), 0);
    }
}
