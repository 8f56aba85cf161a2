//! Retention-bounded record history for one target/observer pair.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

use super::aggregate::{bucketize, RecordAccumulator};
use super::models::{AbbrDataSet, Observer, Record, StatDataSet, Target};
use super::time_range::TimeRange;
use super::DataError;

/// The ordered, retention-bounded history of one (target, observer) pair.
///
/// Writers take the exclusive lock; every read shape takes the shared lock.
/// Records are kept strictly ascending by timestamp with at most one
/// record per instant.
pub struct DataSet {
    target: Arc<Target>,
    observer: Arc<Observer>,
    records: RwLock<VecDeque<Record>>,
}

impl DataSet {
    pub fn new(target: Arc<Target>, observer: Arc<Observer>) -> Self {
        Self {
            target,
            observer,
            records: RwLock::new(VecDeque::new()),
        }
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    // --- Writes ---

    /// Store a record, evicting anything past the retention window.
    pub fn put(&self, record: Record) {
        self.put_at(record, Utc::now());
    }

    /// Store a record as of `now`.
    ///
    /// A record whose timestamp equals a stored one replaces it.
    pub fn put_at(&self, record: Record, now: DateTime<Utc>) {
        let mut records = self.records.write();
        insert_sorted(&mut records, record);
        evict_before(&mut records, retention_cutoff(now));
    }

    /// Drop records older than the retention window. Returns how many were dropped.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = retention_cutoff(now);
        // Cheap check under the shared lock so idle sweeps never block readers.
        match self.records.read().front() {
            Some(first) if first.timestamp < cutoff => {}
            _ => return 0,
        }
        evict_before(&mut self.records.write(), cutoff)
    }

    /// Replace the whole history, e.g. from persisted state.
    pub fn restore(&self, mut records: Vec<Record>, now: DateTime<Utc>) {
        // Stable sort keeps input order among equal timestamps, so the last one wins below.
        records.sort_by_key(|r| r.timestamp);
        let mut restored: VecDeque<Record> = VecDeque::with_capacity(records.len());
        for record in records {
            if restored.back().is_some_and(|last| last.timestamp == record.timestamp) {
                restored.pop_back();
            }
            restored.push_back(record);
        }
        evict_before(&mut restored, retention_cutoff(now));
        *self.records.write() = restored;
    }

    /// Copy of every retained record, oldest first.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.read().iter().cloned().collect()
    }

    // --- Reads ---

    pub fn abbr_data(&self, range: TimeRange) -> AbbrDataSet {
        self.abbr_data_at(range, Utc::now())
    }

    /// Summarize records in `[now - range, now]`.
    ///
    /// Always returns an entry, even when the range holds no records.
    pub fn abbr_data_at(&self, range: TimeRange, now: DateTime<Utc>) -> AbbrDataSet {
        let records = self.records.read();
        let mut acc = RecordAccumulator::default();
        let mut latest = None;
        for record in window(&records, now - range.duration(), now) {
            acc.push(record);
            latest = Some(record);
        }

        AbbrDataSet {
            observer: (*self.observer).clone(),
            count: acc.count(),
            latest: latest.cloned(),
            metrics: acc.finish(),
        }
    }

    pub fn full_data(&self, range: TimeRange) -> Vec<Record> {
        self.full_data_at(range, Utc::now())
    }

    /// Raw records in `[now - range, now]`, oldest first.
    pub fn full_data_at(&self, range: TimeRange, now: DateTime<Utc>) -> Vec<Record> {
        let records = self.records.read();
        window(&records, now - range.duration(), now).cloned().collect()
    }

    pub fn stat_data(&self, interval_minutes: i64) -> Result<StatDataSet, DataError> {
        self.stat_data_at(interval_minutes, Utc::now())
    }

    /// Bucket the full retained history into epoch-aligned intervals.
    ///
    /// Empty buckets are omitted.
    pub fn stat_data_at(
        &self,
        interval_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<StatDataSet, DataError> {
        let width_secs = interval_width_secs(interval_minutes)?;
        let cutoff = retention_cutoff(now);

        let records = self.records.read();
        let start = records.partition_point(|r| r.timestamp < cutoff);
        let buckets = bucketize(records.range(start..), width_secs);

        Ok(StatDataSet {
            observer: (*self.observer).clone(),
            interval_minutes,
            buckets,
        })
    }
}

#[cfg(test)]
impl DataSet {
    pub(crate) fn hold_write(&self) -> parking_lot::RwLockWriteGuard<'_, VecDeque<Record>> {
        self.records.write()
    }
}

impl std::fmt::Debug for DataSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSet")
            .field("target", &self.target.id)
            .field("observer", &self.observer.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Oldest timestamp retention still guarantees to keep at `now`.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - TimeRange::MAX.duration()
}

fn interval_width_secs(interval_minutes: i64) -> Result<i64, DataError> {
    if interval_minutes <= 0 {
        return Err(DataError::InvalidArgument(format!(
            "interval must be positive, got {}",
            interval_minutes
        )));
    }
    interval_minutes.checked_mul(60).ok_or_else(|| {
        DataError::InvalidArgument(format!("interval too large: {}", interval_minutes))
    })
}

fn insert_sorted(records: &mut VecDeque<Record>, record: Record) {
    // Fast path: in-order append
    if records.back().map_or(true, |last| last.timestamp < record.timestamp) {
        records.push_back(record);
        return;
    }

    let idx = records.partition_point(|r| r.timestamp < record.timestamp);
    if records.get(idx).is_some_and(|r| r.timestamp == record.timestamp) {
        records[idx] = record;
    } else {
        records.insert(idx, record);
    }
}

fn evict_before(records: &mut VecDeque<Record>, cutoff: DateTime<Utc>) -> usize {
    let mut evicted = 0;
    while let Some(front) = records.front() {
        if front.timestamp >= cutoff {
            break;
        }
        records.pop_front();
        evicted += 1;
    }
    evicted
}

fn window(
    records: &VecDeque<Record>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> impl Iterator<Item = &Record> {
    let from = records.partition_point(|r| r.timestamp < start);
    let to = records.partition_point(|r| r.timestamp <= end);
    records.range(from..to.max(from))
}
