//! Time-series storage for paced samples.
//!
//! One append-only series per subsystem and per configured core. Values are
//! clamped to 0..=100 and timestamps never go backwards within a series: an
//! older timestamp is dropped, not reordered.

use crate::models::{SamplePoint, SeriesKey, Subsystem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Notification emitted for every stored point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleAppended {
    pub key: SeriesKey,
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    points: Vec<SamplePoint>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point. Returns the stored point, or `None` if it was dropped.
    pub fn append(&mut self, timestamp: f64, value: f64) -> Option<SamplePoint> {
        if !timestamp.is_finite() || !value.is_finite() {
            return None;
        }
        if let Some(last) = self.points.last() {
            if timestamp < last.timestamp {
                return None;
            }
        }
        let point = SamplePoint {
            timestamp,
            value: value.clamp(0.0, 100.0),
        };
        self.points.push(point);
        Some(point)
    }

    pub fn latest(&self) -> Option<SamplePoint> {
        self.points.last().copied()
    }

    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesStore {
    series: BTreeMap<SeriesKey, TimeSeries>,
}

impl TimeSeriesStore {
    /// Create series for every subsystem and for cores `0..core_count`.
    pub fn new(core_count: u32) -> Self {
        let mut series = BTreeMap::new();
        for s in Subsystem::ALL {
            series.insert(SeriesKey::Subsystem(s), TimeSeries::new());
        }
        for id in 0..core_count {
            series.insert(SeriesKey::Core(id), TimeSeries::new());
        }
        TimeSeriesStore { series }
    }

    /// Append to an existing series.
    ///
    /// Unknown keys (e.g. a core id beyond the configured count), non-finite
    /// values and out-of-order timestamps are dropped silently.
    pub fn append(&mut self, key: SeriesKey, timestamp: f64, value: f64) -> Option<SampleAppended> {
        let Some(series) = self.series.get_mut(&key) else {
            log::debug!("[Store] No series for {}, dropping value {}", key, value);
            return None;
        };
        match series.append(timestamp, value) {
            Some(point) => Some(SampleAppended {
                key,
                timestamp: point.timestamp,
                value: point.value,
            }),
            None => {
                log::debug!("[Store] Dropped out-of-order point for {} at {}", key, timestamp);
                None
            }
        }
    }

    pub fn latest(&self, key: SeriesKey) -> Option<SamplePoint> {
        self.series.get(&key).and_then(TimeSeries::latest)
    }

    pub fn series(&self, key: SeriesKey) -> Option<&TimeSeries> {
        self.series.get(&key)
    }

    /// All configured keys in export order
    pub fn keys(&self) -> impl Iterator<Item = SeriesKey> + '_ {
        self.series.keys().copied()
    }

    /// Keys that hold at least one point
    pub fn non_empty_keys(&self) -> Vec<SeriesKey> {
        self.series
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn has_data(&self) -> bool {
        self.series.values().any(|s| !s.is_empty())
    }

    pub fn clear(&mut self, key: SeriesKey) {
        if let Some(series) = self.series.get_mut(&key) {
            series.clear();
        }
    }

    pub fn clear_all(&mut self) {
        for series in self.series.values_mut() {
            series.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_clamped() {
        let mut store = TimeSeriesStore::new(1);
        store.append(SeriesKey::CPU, 1.0, 150.0);
        assert_eq!(store.latest(SeriesKey::CPU).unwrap().value, 100.0);
        store.append(SeriesKey::CPU, 2.0, -5.0);
        assert_eq!(store.latest(SeriesKey::CPU).unwrap().value, 0.0);
    }

    #[test]
    fn test_older_timestamp_is_dropped() {
        let mut store = TimeSeriesStore::new(0);
        assert!(store.append(SeriesKey::GPU, 10.0, 1.0).is_some());
        assert!(store.append(SeriesKey::GPU, 9.0, 2.0).is_none());
        let series = store.series(SeriesKey::GPU).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.latest().unwrap().value, 1.0);

        // Equal timestamps are allowed
        assert!(store.append(SeriesKey::GPU, 10.0, 3.0).is_some());
    }

    #[test]
    fn test_unknown_core_is_dropped() {
        let mut store = TimeSeriesStore::new(2);
        assert!(store.append(SeriesKey::Core(1), 0.0, 5.0).is_some());
        assert!(store.append(SeriesKey::Core(2), 0.0, 5.0).is_none());
        assert!(store.series(SeriesKey::Core(2)).is_none());
    }

    #[test]
    fn test_clear_one_and_all() {
        let mut store = TimeSeriesStore::new(1);
        store.append(SeriesKey::CPU, 0.0, 1.0);
        store.append(SeriesKey::DRAM, 0.0, 1.0);
        store.clear(SeriesKey::CPU);
        assert_eq!(store.non_empty_keys(), vec![SeriesKey::DRAM]);
        store.clear_all();
        assert!(!store.has_data());
    }

    #[test]
    fn test_nan_is_rejected() {
        let mut store = TimeSeriesStore::new(0);
        assert!(store.append(SeriesKey::CPU, 0.0, f64::NAN).is_none());
        assert!(store.latest(SeriesKey::CPU).is_none());
    }
}
