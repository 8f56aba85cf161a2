//! Fixed mapping from (target, observer) to its dataset.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::dataset::DataSet;
use super::models::{AbbrDataSet, Observer, Record, Target, TargetStatData};
use super::time_range::TimeRange;
use super::DataError;
use crate::config::MonitorConfig;

/// Owns one [`DataSet`] per configured pair.
///
/// Built once at startup and never mutated afterwards, so lookups need no
/// synchronization. Each dataset carries its own lock.
pub struct DataSetRegistry {
    targets: BTreeMap<i64, Arc<Target>>,
    observers: BTreeMap<i64, Arc<Observer>>,
    data_sets: HashMap<i64, BTreeMap<i64, DataSet>>,
}

impl DataSetRegistry {
    /// Build the registry from configuration.
    ///
    /// A target with an explicit observer list gets exactly those pairs;
    /// otherwise every configured observer reports on it.
    pub fn new(config: &MonitorConfig) -> Self {
        let observers: BTreeMap<i64, Arc<Observer>> = config
            .observers
            .iter()
            .map(|o| (o.id, Arc::new(o.clone())))
            .collect();

        let mut targets = BTreeMap::new();
        let mut data_sets = HashMap::with_capacity(config.targets.len());

        for target in &config.targets {
            let target = Arc::new(target.clone());
            let mut pairs = BTreeMap::new();

            let observer_ids: Vec<i64> = match &target.observers {
                Some(ids) => ids.clone(),
                None => observers.keys().copied().collect(),
            };

            for observer_id in observer_ids {
                match observers.get(&observer_id) {
                    Some(observer) => {
                        pairs.insert(observer_id, DataSet::new(target.clone(), observer.clone()));
                    }
                    None => tracing::warn!(
                        "Registry: target {} references unknown observer {}, skipping",
                        target.id,
                        observer_id
                    ),
                }
            }

            data_sets.insert(target.id, pairs);
            targets.insert(target.id, target);
        }

        Self {
            targets,
            observers,
            data_sets,
        }
    }

    // --- Lookup ---

    pub fn get(&self, target_id: i64, observer_id: i64) -> Option<&DataSet> {
        self.data_sets.get(&target_id)?.get(&observer_id)
    }

    pub fn target(&self, target_id: i64) -> Option<&Arc<Target>> {
        self.targets.get(&target_id)
    }

    pub fn targets(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.targets.values()
    }

    pub fn observers(&self) -> impl Iterator<Item = &Arc<Observer>> {
        self.observers.values()
    }

    /// Every dataset, ordered by observer id within each target.
    pub fn iter(&self) -> impl Iterator<Item = &DataSet> {
        self.data_sets.values().flat_map(|pairs| pairs.values())
    }

    /// Number of (target, observer) pairs.
    pub fn len(&self) -> usize {
        self.data_sets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total retained records across all pairs.
    pub fn record_count(&self) -> usize {
        self.iter().map(DataSet::len).sum()
    }

    fn target_data_sets(&self, target_id: i64) -> Result<&BTreeMap<i64, DataSet>, DataError> {
        self.data_sets
            .get(&target_id)
            .ok_or(DataError::TargetNotFound(target_id))
    }

    fn pair(&self, target_id: i64, observer_id: i64) -> Result<&DataSet, DataError> {
        self.get(target_id, observer_id).ok_or(DataError::NotFound {
            target_id,
            observer_id,
        })
    }

    // --- Operations ---

    /// Store a record for a pair.
    pub fn put(&self, target_id: i64, observer_id: i64, record: Record) -> Result<(), DataError> {
        record.validate()?;
        self.pair(target_id, observer_id)?.put(record);
        Ok(())
    }

    /// Per-observer summaries for a target, ordered by observer id.
    pub fn abbr_data(&self, target_id: i64, range: TimeRange) -> Result<Vec<AbbrDataSet>, DataError> {
        Ok(self
            .target_data_sets(target_id)?
            .values()
            .map(|ds| ds.abbr_data(range))
            .collect())
    }

    /// Raw records for one pair within the range.
    pub fn full_data(
        &self,
        target_id: i64,
        observer_id: i64,
        range: TimeRange,
    ) -> Result<Vec<Record>, DataError> {
        Ok(self.pair(target_id, observer_id)?.full_data(range))
    }

    /// Bucketed statistics for every observer of a target.
    pub fn stat_data(&self, target_id: i64, interval_minutes: i64) -> Result<TargetStatData, DataError> {
        let target = self
            .target(target_id)
            .ok_or(DataError::TargetNotFound(target_id))?;

        let data = self
            .target_data_sets(target_id)?
            .values()
            .map(|ds| ds.stat_data(interval_minutes))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TargetStatData {
            target: (**target).clone(),
            data,
        })
    }

    /// Evict expired records from every pair. Returns the total evicted.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        self.iter().map(|ds| ds.evict_expired(now)).sum()
    }
}
