// src/signal.rs - latest reading per metric
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// One sensor value with the time it was taken
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Thread-safe store of the most recent reading for every metric.
///
/// Cloning is cheap; clones share the same storage.
///
/// # Examples
///
/// ```rust
/// use stratus::ReadingBus;
/// use chrono::Utc;
///
/// let bus = ReadingBus::new();
/// bus.record("temperature", 23.5, Utc::now());
/// assert_eq!(bus.value("temperature"), Some(23.5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReadingBus {
    readings: Arc<DashMap<String, Reading>>,
}

impl ReadingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a reading. Older timestamps never overwrite newer ones.
    pub fn record(&self, metric: impl AsRef<str>, value: f64, timestamp: DateTime<Utc>) {
        let metric = metric.as_ref();
        trace!("Recording {} = {} at {}", metric, value, timestamp);
        self.readings
            .entry(metric.to_string())
            .and_modify(|current| {
                if timestamp >= current.timestamp {
                    *current = Reading { value, timestamp };
                }
            })
            .or_insert(Reading { value, timestamp });
    }

    pub fn latest(&self, metric: impl AsRef<str>) -> Option<Reading> {
        self.readings.get(metric.as_ref()).map(|entry| *entry.value())
    }

    pub fn value(&self, metric: impl AsRef<str>) -> Option<f64> {
        self.latest(metric).map(|r| r.value)
    }

    /// Metrics whose last reading is older than `cutoff`.
    pub fn stale_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut stale: Vec<String> = self
            .readings
            .iter()
            .filter(|entry| entry.value().timestamp < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        stale.sort();
        stale
    }

    /// Ordered copy of all readings.
    pub fn snapshot(&self) -> BTreeMap<String, Reading> {
        self.readings
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_record_and_read() {
        let bus = ReadingBus::new();
        assert!(bus.is_empty());
        bus.record("temperature", 21.0, t0());
        assert_eq!(bus.latest("temperature"), Some(Reading { value: 21.0, timestamp: t0() }));
        assert_eq!(bus.value("humidity"), None);
    }

    #[test]
    fn test_out_of_order_reading_is_ignored() {
        let bus = ReadingBus::new();
        bus.record("temperature", 21.0, t0() + Duration::minutes(5));
        bus.record("temperature", 19.0, t0());
        assert_eq!(bus.value("temperature"), Some(21.0));
    }

    #[test]
    fn test_clones_share_storage() {
        let bus = ReadingBus::new();
        let clone = bus.clone();
        clone.record("pressure", 1013.2, t0());
        assert_eq!(bus.value("pressure"), Some(1013.2));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_stale_since() {
        let bus = ReadingBus::new();
        bus.record("wind", 3.0, t0());
        bus.record("rain", 0.0, t0() + Duration::hours(2));
        assert_eq!(bus.stale_since(t0() + Duration::hours(1)), vec!["wind".to_string()]);
        assert_eq!(bus.snapshot().len(), 2);
    }
}
