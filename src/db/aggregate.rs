//! Running count/min/max/mean accumulators.
//!
//! Shared by the abbreviated summary and the bucketed statistics so both
//! read shapes agree on how a metric is reduced.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::models::{MetricStat, Record, StatBucket};

/// Accumulates values of a single metric.
#[derive(Debug, Clone, Copy)]
pub struct StatAccumulator {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Default for StatAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
        }
    }
}

impl StatAccumulator {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.sum += value;
    }

    /// Returns `None` when nothing was pushed.
    pub fn finish(&self) -> Option<MetricStat> {
        if self.count == 0 {
            return None;
        }
        // Rounding in the sum can push the mean a hair outside [min, max].
        let mean = (self.sum / self.count as f64).clamp(self.min, self.max);
        Some(MetricStat {
            count: self.count,
            min: self.min,
            max: self.max,
            mean,
        })
    }
}

/// Accumulates every metric of a group of records.
#[derive(Debug, Clone, Default)]
pub struct RecordAccumulator {
    records: usize,
    metrics: BTreeMap<String, StatAccumulator>,
}

impl RecordAccumulator {
    pub fn push(&mut self, record: &Record) {
        self.records += 1;
        for (name, value) in &record.metrics {
            match self.metrics.get_mut(name) {
                Some(acc) => acc.push(*value),
                None => {
                    let mut acc = StatAccumulator::default();
                    acc.push(*value);
                    self.metrics.insert(name.clone(), acc);
                }
            }
        }
    }

    pub fn count(&self) -> usize {
        self.records
    }

    pub fn finish(&self) -> BTreeMap<String, MetricStat> {
        self.metrics
            .iter()
            .filter_map(|(name, acc)| acc.finish().map(|stat| (name.clone(), stat)))
            .collect()
    }
}

/// Start of the epoch-aligned bucket containing `ts`.
pub fn bucket_start(ts: DateTime<Utc>, width_secs: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let truncated = secs - secs.rem_euclid(width_secs);
    DateTime::from_timestamp(truncated, 0).unwrap_or(ts)
}

/// Group ordered records into epoch-aligned buckets of `width_secs`.
///
/// Records must be sorted by timestamp. Empty buckets are not emitted.
pub fn bucketize<'a, I>(records: I, width_secs: i64) -> Vec<StatBucket>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut buckets = Vec::new();
    let mut current: Option<(DateTime<Utc>, RecordAccumulator)> = None;

    for record in records {
        let start = bucket_start(record.timestamp, width_secs);
        match current.as_mut() {
            Some((bucket, acc)) if *bucket == start => acc.push(record),
            _ => {
                if let Some((bucket, acc)) = current.take() {
                    buckets.push(finish_bucket(bucket, &acc));
                }
                let mut acc = RecordAccumulator::default();
                acc.push(record);
                current = Some((start, acc));
            }
        }
    }

    if let Some((bucket, acc)) = current {
        buckets.push(finish_bucket(bucket, &acc));
    }

    buckets
}

fn finish_bucket(start: DateTime<Utc>, acc: &RecordAccumulator) -> StatBucket {
    StatBucket {
        start,
        count: acc.count(),
        metrics: acc.finish(),
    }
}
