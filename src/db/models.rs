//! Data model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::DataError;

/// A monitored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Observers enabled for this target. `None` means every configured observer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observers: Option<Vec<i64>>,
}

/// A monitoring agent reporting metrics about targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub id: i64,
    pub name: String,
}

/// One timestamped sample of named metric values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
}

impl Record {
    /// Check that the record can be stored.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.metrics.is_empty() {
            return Err(DataError::InvalidArgument("record has no metrics".to_string()));
        }
        for (name, value) in &self.metrics {
            if name.is_empty() {
                return Err(DataError::InvalidArgument("metric name is empty".to_string()));
            }
            if !value.is_finite() {
                return Err(DataError::InvalidArgument(format!(
                    "metric {} has non-finite value",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl Record {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

/// count/min/max/mean of one metric over a set of records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStat {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Compact per-observer summary over a time range.
#[derive(Debug, Clone, Serialize)]
pub struct AbbrDataSet {
    pub observer: Observer,
    pub count: usize,
    pub latest: Option<Record>,
    pub metrics: BTreeMap<String, MetricStat>,
}

/// Statistics for one fixed-width time bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatBucket {
    pub start: DateTime<Utc>,
    pub count: usize,
    pub metrics: BTreeMap<String, MetricStat>,
}

/// Bucketed aggregation of an observer's retained history.
#[derive(Debug, Clone, Serialize)]
pub struct StatDataSet {
    pub observer: Observer,
    pub interval_minutes: i64,
    pub buckets: Vec<StatBucket>,
}

/// Stat results for every observer of a target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatData {
    pub target: Target,
    pub data: Vec<StatDataSet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_validate() {
        let now = Utc::now();
        assert!(Record::new(now).with_metric("cpu", 1.0).validate().is_ok());

        // No metrics
        assert!(Record::new(now).validate().is_err());

        // Empty name
        assert!(Record::new(now).with_metric("", 1.0).validate().is_err());

        // Non-finite value
        assert!(Record::new(now).with_metric("cpu", f64::NAN).validate().is_err());
        assert!(Record::new(now).with_metric("cpu", f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_record_json() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","metrics":{"cpu":12.5,"mem":40}}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.metrics.len(), 2);
        assert_eq!(record.metrics["mem"], 40.0);
    }

    #[test]
    fn test_target_observers_default() {
        let target: Target = serde_json::from_str(r#"{"id":1,"name":"web"}"#).unwrap();
        assert!(target.observers.is_none());
        assert_eq!(target.address, "");
    }
}
