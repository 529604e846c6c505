// src/engine.rs
use crate::{
    alarms::{AlarmConfig, AlarmState, AlarmStatus, TransitionEvent},
    error::*,
    notify::DispatchHandle,
    signal::ReadingBus,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use metrics::counter;

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub alarm_count: usize,
    pub triggered_count: usize,
    pub evaluations: u64,
    pub transitions: u64,
}

/// What a [`AlarmEngine::reload`] changed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub added: usize,
    pub replaced: usize,
    /// Definition changed but trigger state was carried over
    pub reconfigured: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Registry entry. The config is immutable and the state has its own lock,
/// so alarms never contend with each other.
#[derive(Clone)]
struct AlarmEntry {
    config: Arc<AlarmConfig>,
    state: Arc<Mutex<AlarmState>>,
}

impl AlarmEntry {
    fn new(config: AlarmConfig) -> Self {
        let config = Arc::new(config);
        Self {
            state: Arc::new(Mutex::new(AlarmState::new(config.clone()))),
            config,
        }
    }

    fn with_state(config: Arc<AlarmConfig>, state: AlarmState) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }
}

/// Owns every configured alarm and routes readings to them.
///
/// All methods take `&self`; share the engine behind an `Arc`.
pub struct AlarmEngine {
    alarms: DashMap<String, AlarmEntry>,
    readings: ReadingBus,
    dispatch: DispatchHandle,
    evaluations: AtomicU64,
    transitions: AtomicU64,
}

impl AlarmEngine {
    pub fn new(dispatch: DispatchHandle) -> Self {
        Self::with_readings(dispatch, ReadingBus::new())
    }

    pub fn with_readings(dispatch: DispatchHandle, readings: ReadingBus) -> Self {
        Self {
            alarms: DashMap::new(),
            readings,
            dispatch,
            evaluations: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
        }
    }

    /// Builds an engine and loads `configs` as one validated batch.
    pub fn from_configs(configs: Vec<AlarmConfig>, dispatch: DispatchHandle) -> Result<Self> {
        let engine = Self::new(dispatch);
        engine.reload(configs)?;
        Ok(engine)
    }

    pub fn readings(&self) -> &ReadingBus {
        &self.readings
    }

    pub fn dispatch(&self) -> &DispatchHandle {
        &self.dispatch
    }

    /// Installs an alarm, replacing any alarm of the same name together
    /// with its state.
    pub fn register_or_replace(&self, config: AlarmConfig) -> Result<()> {
        config.validate()?;
        let name = config.name.clone();
        let replaced = self.alarms.insert(name.clone(), AlarmEntry::new(config)).is_some();
        if replaced {
            info!("Replaced alarm '{}'", name);
        } else {
            info!("Registered alarm '{}'", name);
        }
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.alarms
            .remove(name)
            .map(|_| info!("Removed alarm '{}'", name))
            .ok_or_else(|| MonitorError::AlarmNotFound(name.to_string()))
    }

    /// Swaps in a complete alarm set.
    ///
    /// Every definition is validated first; on any error nothing changes.
    /// Definitions whose trigger settings are unchanged keep their latches,
    /// even when enablement, units or notifications differ. Alarms with a new
    /// metric, kind, threshold, persistence or latch window start fresh and
    /// alarms missing from `configs` are dropped.
    pub fn reload(&self, configs: Vec<AlarmConfig>) -> Result<ReloadSummary> {
        let mut names = HashSet::new();
        for config in &configs {
            config.validate()?;
            if !names.insert(config.name.clone()) {
                return Err(MonitorError::Config(format!("Duplicate alarm name '{}'", config.name)));
            }
        }

        let mut summary = ReloadSummary::default();
        for config in configs {
            let name = config.name.clone();
            let existing = self.alarms.get(&name).map(|entry| entry.value().clone());
            match existing {
                Some(entry) if *entry.config == config => {
                    summary.unchanged += 1;
                }
                Some(entry) if entry.config.same_trigger(&config) => {
                    // Lock held across the swap so the carried state is current
                    let state = entry.state.lock();
                    let config = Arc::new(config);
                    let carried = state.reconfigured(config.clone());
                    self.alarms.insert(name.clone(), AlarmEntry::with_state(config, carried));
                    drop(state);
                    debug!("Reload reconfigured alarm '{}' keeping its state", name);
                    summary.reconfigured += 1;
                }
                Some(_) => {
                    self.alarms.insert(name.clone(), AlarmEntry::new(config));
                    debug!("Reload replaced alarm '{}'", name);
                    summary.replaced += 1;
                }
                None => {
                    self.alarms.insert(name.clone(), AlarmEntry::new(config));
                    debug!("Reload added alarm '{}'", name);
                    summary.added += 1;
                }
            }
        }

        let before = self.alarms.len();
        self.alarms.retain(|name, _| names.contains(name));
        summary.removed = before - self.alarms.len();

        info!(
            "Alarm configuration loaded: {} added, {} replaced, {} reconfigured, {} unchanged, {} removed",
            summary.added, summary.replaced, summary.reconfigured, summary.unchanged, summary.removed
        );
        Ok(summary)
    }

    fn entries_for(&self, metric: &str) -> Vec<AlarmEntry> {
        self.alarms
            .iter()
            .filter(|entry| entry.config.metric == metric)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn all_entries(&self) -> Vec<AlarmEntry> {
        self.alarms.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Feeds one reading to every alarm bound to `metric`.
    ///
    /// Never blocks on notification I/O and never fails: malformed values
    /// simply do not qualify. Returns the number of transitions produced.
    pub fn evaluate(&self, metric: &str, value: f64, now: DateTime<Utc>) -> usize {
        if !value.is_finite() {
            debug!("Non-finite reading for '{}' treated as non-qualifying", metric);
        }
        self.readings.record(metric, value, now);
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let mut produced = 0;
        for entry in self.entries_for(metric) {
            let mut state = entry.state.lock();
            let events = state.evaluate(value, now);
            produced += events.len();
            self.publish(&entry, state.is_enabled(), events);
        }
        produced
    }

    /// Ages out expired latches on every alarm, whether or not readings arrive.
    pub fn periodic_sweep(&self, now: DateTime<Utc>) -> usize {
        let mut produced = 0;
        for entry in self.all_entries() {
            let mut state = entry.state.lock();
            let events = state.clear(now);
            produced += events.len();
            self.publish(&entry, state.is_enabled(), events);
        }
        if produced > 0 {
            debug!("Sweep cleared {} latched alarm channels", produced);
        }
        produced
    }

    /// Hands events to the dispatcher; called with the alarm's lock held.
    fn publish(&self, entry: &AlarmEntry, enabled: bool, events: Vec<TransitionEvent>) {
        for event in events {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("stratus_alarm_transitions_total").increment(1);

            if enabled {
                info!(
                    "Alarm '{}' {} ({} channel, {} = {})",
                    event.alarm_name, event.direction, event.channel, event.metric, event.value
                );
                self.dispatch.notify(event, entry.config.clone());
            } else {
                debug!(
                    "Alarm '{}' {} while disabled; notification suppressed",
                    event.alarm_name, event.direction
                );
                self.dispatch.record_suppressed();
            }
        }
    }

    /// Read-only snapshot of one alarm.
    pub fn status(&self, name: &str) -> Result<AlarmStatus> {
        let entry = self
            .alarms
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MonitorError::AlarmNotFound(name.to_string()))?;
        let status = entry.state.lock().status();
        Ok(status)
    }

    /// Snapshots of all alarms, ordered by name.
    pub fn statuses(&self) -> Vec<AlarmStatus> {
        let mut statuses: Vec<AlarmStatus> = self
            .all_entries()
            .into_iter()
            .map(|entry| entry.state.lock().status())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Mutes or unmutes an alarm's notifications without touching its history.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let entry = self
            .alarms
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MonitorError::AlarmNotFound(name.to_string()))?;
        entry.state.lock().set_enabled(enabled);
        if enabled {
            info!("Alarm '{}' enabled", name);
        } else {
            warn!("Alarm '{}' disabled; notifications muted", name);
        }
        Ok(())
    }

    pub fn alarms_for_metric(&self, metric: &str) -> Vec<String> {
        let mut names: Vec<String> = self.entries_for(metric).into_iter().map(|e| e.config.name.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn stats(&self) -> EngineStats {
        let entries = self.all_entries();
        EngineStats {
            alarm_count: entries.len(),
            triggered_count: entries.iter().filter(|e| e.state.lock().is_triggered()).count(),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
        }
    }
}
