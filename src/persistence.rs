//! Bridges the in-memory registry to the snapshot store.
//!
//! Process lifetime: `Uninitialized -> Loading -> Serving -> Draining -> Terminated`.
//! Writes are accepted only while `Serving`; reads keep working while draining.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::db::{DataSetRegistry, Store};

/// Lifecycle state of the serving process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Lifecycle {
    Uninitialized = 0,
    Loading = 1,
    Serving = 2,
    Draining = 3,
    Terminated = 4,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Uninitialized,
            1 => Lifecycle::Loading,
            2 => Lifecycle::Serving,
            3 => Lifecycle::Draining,
            _ => Lifecycle::Terminated,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Pairs restored from storage
    pub loaded: usize,
    /// Pairs with no stored history
    pub missing: usize,
    /// Pairs whose storage could not be read; they start empty
    pub failed: usize,
    /// Records retained after restore
    pub records: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    Completed(SaveReport),
    TimedOut,
    Failed(String),
    /// A drain already ran or is running.
    AlreadyDrained,
}

/// Loads datasets at startup and saves them on checkpoint and shutdown.
pub struct PersistenceManager {
    store: Arc<Store>,
    registry: Arc<DataSetRegistry>,
    state: AtomicU8,
    drain_started: AtomicBool,
    /// Held shared by every accepted write, exclusive while entering `Draining`.
    write_gate: RwLock<()>,
    /// Serializes whole save passes so the final one always writes last.
    save_lock: Mutex<()>,
}

impl PersistenceManager {
    pub fn new(store: Arc<Store>, registry: Arc<DataSetRegistry>) -> Self {
        Self {
            store,
            registry,
            state: AtomicU8::new(Lifecycle::Uninitialized as u8),
            drain_started: AtomicBool::new(false),
            write_gate: RwLock::new(()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: Lifecycle) {
        tracing::info!("Lifecycle: {:?} -> {:?}", self.state(), state);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Puts are rejected once draining starts.
    pub fn accepts_writes(&self) -> bool {
        self.state() == Lifecycle::Serving
    }

    /// Run `write` only if the process is still serving.
    ///
    /// Returns `None` once draining has begun. A write that gets in finishes
    /// before the drain snapshots anything.
    pub fn try_write<T>(&self, write: impl FnOnce() -> T) -> Option<T> {
        let _gate = self.write_gate.read();
        if !self.accepts_writes() {
            return None;
        }
        Some(write())
    }

    /// Hydrate every dataset from storage, then enter `Serving`.
    ///
    /// A missing or unreadable pair starts empty; the rest still load.
    pub fn load_all(&self) -> LoadReport {
        self.set_state(Lifecycle::Loading);

        let now = Utc::now();
        let mut report = LoadReport::default();

        for ds in self.registry.iter() {
            let (target_id, observer_id) = (ds.target().id, ds.observer().id);
            match self.store.load_records(target_id, observer_id) {
                Ok(Some(records)) => {
                    ds.restore(records, now);
                    report.loaded += 1;
                    report.records += ds.len();
                }
                Ok(None) => {
                    tracing::debug!(
                        "Persistence: no stored data for target {} observer {}",
                        target_id,
                        observer_id
                    );
                    report.missing += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Persistence: failed to load target {} observer {}, starting empty: {}",
                        target_id,
                        observer_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Persistence: loaded {} pairs ({} records), {} empty, {} failed",
            report.loaded,
            report.records,
            report.missing,
            report.failed
        );

        self.set_state(Lifecycle::Serving);
        report
    }

    /// Write every dataset to storage, replacing prior state.
    pub fn save_all(&self) -> SaveReport {
        let _saving = self.save_lock.lock();
        let mut report = SaveReport::default();

        for ds in self.registry.iter() {
            let (target_id, observer_id) = (ds.target().id, ds.observer().id);
            let records = ds.snapshot();
            match self.store.save_records(target_id, observer_id, &records) {
                Ok(()) => {
                    report.saved += 1;
                    report.records += records.len();
                }
                Err(e) => {
                    tracing::warn!(
                        "Persistence: failed to save target {} observer {}: {}",
                        target_id,
                        observer_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            tracing::error!(
                "Persistence: {} of {} pairs were not saved",
                report.failed,
                report.failed + report.saved
            );
        } else {
            tracing::info!(
                "Persistence: saved {} pairs ({} records)",
                report.saved,
                report.records
            );
        }

        report
    }

    /// Final save before exit. Runs at most once; later calls are no-ops.
    ///
    /// The save runs on the blocking pool and is abandoned after `grace`,
    /// including any time spent waiting for a checkpoint already in progress.
    pub async fn drain(self: &Arc<Self>, grace: Duration) -> DrainOutcome {
        if self.drain_started.swap(true, Ordering::AcqRel) {
            return DrainOutcome::AlreadyDrained;
        }
        {
            // Waits for in-flight writes to land before the snapshot.
            let _gate = self.write_gate.write();
            self.set_state(Lifecycle::Draining);
        }

        let manager = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || manager.save_all());

        let outcome = match tokio::time::timeout(grace, task).await {
            Ok(Ok(report)) => DrainOutcome::Completed(report),
            Ok(Err(e)) => {
                tracing::error!("Persistence: save task failed: {}", e);
                DrainOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!("Persistence: save did not finish within {:?}", grace);
                DrainOutcome::TimedOut
            }
        };

        self.set_state(Lifecycle::Terminated);
        outcome
    }
}

#[cfg(test)]
impl PersistenceManager {
    pub(crate) fn lock_saves(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.save_lock.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::db::{Observer, Record, Target, TimeRange};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    fn monitor_config() -> MonitorConfig {
        MonitorConfig {
            targets: vec![
                Target {
                    id: 1,
                    name: "web".to_string(),
                    address: "10.0.0.1".to_string(),
                    observers: None,
                },
                Target {
                    id: 2,
                    name: "db".to_string(),
                    address: "10.0.0.2".to_string(),
                    observers: Some(vec![1]),
                },
            ],
            observers: vec![
                Observer { id: 1, name: "tokyo".to_string() },
                Observer { id: 2, name: "paris".to_string() },
            ],
            ..Default::default()
        }
    }

    fn make_manager(path: &std::path::Path) -> (Arc<Store>, Arc<DataSetRegistry>, Arc<PersistenceManager>) {
        let store = Arc::new(Store::new(path).unwrap());
        let registry = Arc::new(DataSetRegistry::new(&monitor_config()));
        let manager = Arc::new(PersistenceManager::new(store.clone(), registry.clone()));
        (store, registry, manager)
    }

    fn fill(registry: &DataSetRegistry) {
        let base = Utc::now() - ChronoDuration::hours(3);
        for (t, o) in [(1, 1), (1, 2), (2, 1)] {
            for i in 0..10 {
                let record = Record::new(base + ChronoDuration::minutes(i))
                    .with_metric("cpu", (t * 100 + o * 10 + i) as f64);
                registry.put(t, o, record).unwrap();
            }
        }
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let tmp = NamedTempFile::new().unwrap();

        let (_, registry, manager) = make_manager(tmp.path());
        manager.load_all();
        fill(&registry);
        let report = manager.save_all();
        assert_eq!(report.saved, 3);
        assert_eq!(report.records, 30);

        // Simulated restart
        let (_, restarted, manager) = make_manager(tmp.path());
        assert_eq!(manager.state(), Lifecycle::Uninitialized);
        let loaded = manager.load_all();
        assert_eq!(loaded.loaded, 3);
        assert_eq!(loaded.records, 30);
        assert_eq!(manager.state(), Lifecycle::Serving);

        for (t, o) in [(1, 1), (1, 2), (2, 1)] {
            assert_eq!(
                restarted.get(t, o).unwrap().snapshot(),
                registry.get(t, o).unwrap().snapshot()
            );
        }
        assert_eq!(
            restarted.full_data(1, 2, TimeRange::Day).unwrap(),
            registry.full_data(1, 2, TimeRange::Day).unwrap()
        );
    }

    #[test]
    fn test_corrupt_pair_does_not_block_others() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let (store, registry, manager) = make_manager(tmp.path());
            fill(&registry);
            manager.save_all();
            store.write_raw(1, 1, 10, "{garbage").unwrap();
        }

        let (_, registry, manager) = make_manager(tmp.path());
        let report = manager.load_all();
        assert_eq!(report.failed, 1);
        assert_eq!(report.loaded, 2);
        assert!(registry.get(1, 1).unwrap().is_empty());
        assert_eq!(registry.get(1, 2).unwrap().len(), 10);
        assert_eq!(registry.get(2, 1).unwrap().len(), 10);
        assert!(manager.accepts_writes());
    }

    #[test]
    fn test_load_empty_store() {
        let tmp = NamedTempFile::new().unwrap();
        let (_, registry, manager) = make_manager(tmp.path());
        let report = manager.load_all();
        assert_eq!(report.missing, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(registry.record_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_runs_once() {
        let tmp = NamedTempFile::new().unwrap();
        let (store, registry, manager) = make_manager(tmp.path());
        manager.load_all();
        fill(&registry);

        let outcome = manager.drain(Duration::from_secs(5)).await;
        match outcome {
            DrainOutcome::Completed(report) => assert_eq!(report.saved, 3),
            other => panic!("unexpected drain outcome: {:?}", other),
        }
        assert_eq!(manager.state(), Lifecycle::Terminated);
        assert!(!manager.accepts_writes());
        assert_eq!(store.pair_count().unwrap(), 3);

        assert_eq!(manager.drain(Duration::from_secs(5)).await, DrainOutcome::AlreadyDrained);
    }

    #[tokio::test]
    async fn test_drain_is_bounded() {
        let tmp = NamedTempFile::new().unwrap();
        let (store, _, manager) = make_manager(tmp.path());
        manager.load_all();

        // Hold the connection so the save cannot make progress.
        let guard = store.lock();
        let outcome = manager.drain(Duration::from_millis(50)).await;
        drop(guard);

        assert_eq!(outcome, DrainOutcome::TimedOut);
        assert_eq!(manager.state(), Lifecycle::Terminated);
    }

    #[test]
    fn test_save_passes_do_not_overlap() {
        let tmp = NamedTempFile::new().unwrap();
        let (store, registry, manager) = make_manager(tmp.path());
        manager.load_all();
        fill(&registry);

        // Stands in for a checkpoint that is still writing.
        let guard = manager.lock_saves();
        let saver = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.save_all())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(store.pair_count().unwrap(), 0);

        drop(guard);
        assert_eq!(saver.join().unwrap().saved, 3);
        assert_eq!(store.pair_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_drain_waits_for_running_save() {
        let tmp = NamedTempFile::new().unwrap();
        let (store, registry, manager) = make_manager(tmp.path());
        manager.load_all();
        fill(&registry);

        let guard = manager.lock_saves();
        let drain = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.drain(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.pair_count().unwrap(), 0);
        assert!(!manager.accepts_writes());

        drop(guard);
        match drain.await.unwrap() {
            DrainOutcome::Completed(report) => assert_eq!(report.saved, 3),
            other => panic!("unexpected drain outcome: {:?}", other),
        }
        assert_eq!(store.pair_count().unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acknowledged_writes_survive_drain() {
        let tmp = NamedTempFile::new().unwrap();
        let (_, registry, manager) = make_manager(tmp.path());
        manager.load_all();

        let acked = Arc::new(AtomicUsize::new(0));
        let writer = {
            let (registry, manager, acked) = (registry.clone(), manager.clone(), acked.clone());
            std::thread::spawn(move || {
                let base = Utc::now() - ChronoDuration::hours(2);
                for i in 0..5000 {
                    let record = Record::new(base + ChronoDuration::seconds(i))
                        .with_metric("cpu", i as f64);
                    match manager.try_write(|| registry.put(1, 1, record)) {
                        Some(result) => {
                            result.unwrap();
                            acked.fetch_add(1, Ordering::SeqCst);
                        }
                        None => break,
                    }
                }
            })
        };

        while acked.load(Ordering::SeqCst) < 100 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let outcome = manager.drain(Duration::from_secs(5)).await;
        assert!(matches!(outcome, DrainOutcome::Completed(_)));
        writer.join().unwrap();

        // Every write that got in is in the final save
        let (_, restarted, manager) = make_manager(tmp.path());
        manager.load_all();
        assert_eq!(restarted.get(1, 1).unwrap().len(), acked.load(Ordering::SeqCst));
        assert!(manager.try_write(|| ()).is_some());
    }
}
