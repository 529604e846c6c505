// File: src/alarms.rs
// Debounced, latching alarm state machines for STRATUS
//
// Each configured alarm owns one (or, for rate-of-change alarms, two)
// trigger latches. A latch counts consecutive qualifying readings, declares
// the alarm live once the persistence count is reached and, when a latch
// window is configured, holds it live for that many hours after the last
// qualifying reading.

use crate::{MonitorError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound on latch windows (ten years), keeps timestamp arithmetic in range.
pub const MAX_LATCH_HOURS: f64 = 87_600.0;

// ==========================================
// SECTION 1: CONFIGURATION
// ==========================================

/// How a reading is compared against the alarm threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// Qualifies when `value > threshold`
    AboveThreshold,

    /// Qualifies when `value < threshold`
    BelowThreshold,

    /// Reading is a rate; `value > threshold` qualifies the up channel,
    /// `value < -threshold` the down channel
    RateOfChange,

    /// Reading is a flag; any finite non-zero value qualifies
    GenericTrigger,
}

/// External program started on a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub command: String,

    /// Arguments, rendered with the notification placeholders
    #[serde(default)]
    pub args: Vec<String>,
}

/// Per-alarm notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Send an e-mail on transitions
    #[serde(default)]
    pub email: bool,

    /// Start an external program on transitions
    #[serde(default)]
    pub action: Option<ActionConfig>,

    /// Body template for rising transitions
    #[serde(default)]
    pub rising_template: Option<String>,

    /// Body template for falling transitions
    #[serde(default)]
    pub falling_template: Option<String>,

    /// Whether falling transitions notify at all
    #[serde(default = "default_true")]
    pub notify_on_clear: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            email: false,
            action: None,
            rising_template: None,
            falling_template: None,
            notify_on_clear: true,
        }
    }
}

/// Alarm definition. Immutable once registered; reconfiguration replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Stable identifier. Filled from the mapping key when loaded from YAML.
    #[serde(default)]
    pub name: String,

    /// Metric whose readings drive this alarm
    pub metric: String,

    pub kind: AlarmKind,

    /// Threshold in the metric's units (ignored by `generic_trigger`)
    #[serde(default)]
    pub threshold: f64,

    /// Consecutive qualifying readings required before the alarm goes live
    #[serde(default = "default_persistence_count")]
    pub persistence_count: u32,

    /// Hours the alarm stays live after the condition last held; 0 clears at once
    #[serde(default)]
    pub latch_hours: f64,

    /// Notification side effects fire only while enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Engineering units, used in messages only
    #[serde(default)]
    pub units: String,

    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_true() -> bool {
    true
}

fn default_persistence_count() -> u32 {
    1
}

impl AlarmConfig {
    pub fn new(name: impl Into<String>, metric: impl Into<String>, kind: AlarmKind, threshold: f64) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            kind,
            threshold,
            persistence_count: default_persistence_count(),
            latch_hours: 0.0,
            enabled: true,
            units: String::new(),
            notify: NotifyConfig::default(),
        }
    }

    pub fn with_persistence(mut self, count: u32) -> Self {
        self.persistence_count = count;
        self
    }

    pub fn with_latch_hours(mut self, hours: f64) -> Self {
        self.latch_hours = hours;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_notify(mut self, notify: NotifyConfig) -> Self {
        self.notify = notify;
        self
    }

    /// Checks the definition, naming the alarm and the offending field.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> {
            Err(MonitorError::Config(format!("Alarm '{}': {}", self.name, msg)))
        };

        if self.name.trim().is_empty() {
            return Err(MonitorError::Config("Alarm name must not be empty".to_string()));
        }
        if self.metric.trim().is_empty() {
            return fail("missing required field 'metric'".to_string());
        }
        if self.persistence_count == 0 {
            return fail("persistence_count must be at least 1".to_string());
        }
        if !self.latch_hours.is_finite() || self.latch_hours < 0.0 || self.latch_hours > MAX_LATCH_HOURS {
            return fail(format!(
                "latch_hours must be between 0 and {}, got {}",
                MAX_LATCH_HOURS, self.latch_hours
            ));
        }
        if self.kind != AlarmKind::GenericTrigger && !self.threshold.is_finite() {
            return fail(format!("threshold must be a finite number, got {}", self.threshold));
        }
        if self.kind == AlarmKind::RateOfChange && self.threshold < 0.0 {
            return fail(format!(
                "rate_of_change threshold is a magnitude and must be >= 0, got {}",
                self.threshold
            ));
        }
        if let Some(action) = &self.notify.action {
            if action.command.trim().is_empty() {
                return fail("action command must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Whether `other` drives the same trigger/latch state machine.
    ///
    /// Only metric, kind, threshold, persistence and latch window matter;
    /// enablement, units and notification settings can change under a live latch.
    pub fn same_trigger(&self, other: &AlarmConfig) -> bool {
        let same_threshold = self.kind == AlarmKind::GenericTrigger
            || self.threshold.to_bits() == other.threshold.to_bits();
        self.metric == other.metric
            && self.kind == other.kind
            && same_threshold
            && self.persistence_count == other.persistence_count
            && self.latch_hours.to_bits() == other.latch_hours.to_bits()
    }

    /// Latch window as a duration; zero when latching is off.
    pub fn latch_duration(&self) -> Duration {
        Duration::milliseconds((self.latch_hours * 3_600_000.0).round() as i64)
    }
}

// ==========================================
// SECTION 2: TRANSITIONS
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Alarm went live
    Rising,
    /// Alarm cleared
    Falling,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rising => write!(f, "rising"),
            Direction::Falling => write!(f, "falling"),
        }
    }
}

/// Which latch of an alarm produced a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Threshold and trigger kinds have a single latch
    Level,
    /// Rate-of-change, increasing
    Up,
    /// Rate-of-change, decreasing
    Down,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Level => write!(f, "level"),
            Channel::Up => write!(f, "up"),
            Channel::Down => write!(f, "down"),
        }
    }
}

/// A rising or falling edge of one alarm channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub alarm_name: String,
    pub metric: String,
    pub direction: Direction,
    pub channel: Channel,
    /// Reading that caused the edge; for sweep clears the last reading seen
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Coarse lifecycle phase, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmPhase {
    Idle,
    Accumulating,
    Triggered,
    Latched,
}

// ==========================================
// SECTION 3: TRIGGER LATCH
// ==========================================

#[derive(Debug, Clone, Default, PartialEq)]
struct TriggerLatch {
    triggered: bool,
    qualifying_count: u32,
    holding: bool,
    triggered_at: Option<DateTime<Utc>>,
    last_qualifying_at: Option<DateTime<Utc>>,
}

impl TriggerLatch {
    fn step(&mut self, holds: bool, now: DateTime<Utc>, persistence: u32, latch: Duration) -> Option<Direction> {
        self.holding = holds;

        if holds {
            self.qualifying_count = self.qualifying_count.saturating_add(1);
            self.last_qualifying_at = Some(now);

            if self.triggered {
                // Sliding latch window
                self.triggered_at = Some(now);
                return None;
            }
            if self.qualifying_count >= persistence {
                self.triggered = true;
                self.triggered_at = Some(now);
                return Some(Direction::Rising);
            }
            return None;
        }

        if self.triggered {
            if latch.is_zero() || self.latch_expired(now, latch) {
                self.release();
                return Some(Direction::Falling);
            }
            return None;
        }

        self.qualifying_count = 0;
        None
    }

    /// Ages out a latched alarm with no new readings.
    fn expire(&mut self, now: DateTime<Utc>, latch: Duration) -> Option<Direction> {
        if self.triggered && !latch.is_zero() && self.latch_expired(now, latch) {
            self.release();
            return Some(Direction::Falling);
        }
        None
    }

    fn latch_expired(&self, now: DateTime<Utc>, latch: Duration) -> bool {
        match self.triggered_at.and_then(|at| at.checked_add_signed(latch)) {
            Some(deadline) => now > deadline,
            None => true,
        }
    }

    fn release(&mut self) {
        self.triggered = false;
        self.qualifying_count = 0;
        self.holding = false;
    }

    fn phase(&self) -> AlarmPhase {
        match (self.triggered, self.holding) {
            (true, true) => AlarmPhase::Triggered,
            (true, false) => AlarmPhase::Latched,
            (false, _) if self.qualifying_count > 0 => AlarmPhase::Accumulating,
            (false, _) => AlarmPhase::Idle,
        }
    }
}

// ==========================================
// SECTION 4: ALARM STATE
// ==========================================

/// Runtime state of one alarm. Sole owner of its trigger/latch bookkeeping.
#[derive(Debug, Clone)]
pub struct AlarmState {
    config: Arc<AlarmConfig>,
    enabled: bool,
    /// Level latch, or the up channel for rate-of-change alarms
    primary: TriggerLatch,
    /// Down channel, only used by rate-of-change alarms
    down: TriggerLatch,
    last_value: Option<f64>,
    last_evaluated_at: Option<DateTime<Utc>>,
}

impl AlarmState {
    pub fn new(config: Arc<AlarmConfig>) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            enabled,
            primary: TriggerLatch::default(),
            down: TriggerLatch::default(),
            last_value: None,
            last_evaluated_at: None,
        }
    }

    /// Same latches and last reading under a new definition.
    ///
    /// Callers must check [`AlarmConfig::same_trigger`] first; enablement is
    /// taken from the new definition.
    pub fn reconfigured(&self, config: Arc<AlarmConfig>) -> Self {
        Self {
            enabled: config.enabled,
            config,
            primary: self.primary.clone(),
            down: self.down.clone(),
            last_value: self.last_value,
            last_evaluated_at: self.last_evaluated_at,
        }
    }

    pub fn config(&self) -> &Arc<AlarmConfig> {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Mutes or unmutes notifications. Trigger history is untouched.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_triggered(&self) -> bool {
        self.primary.triggered || self.down.triggered
    }

    /// Whether `value` qualifies the (primary/up, down) channels.
    ///
    /// Non-finite readings never qualify. Comparisons are strict.
    fn qualifies(&self, value: f64) -> (bool, bool) {
        if !value.is_finite() {
            return (false, false);
        }
        let threshold = self.config.threshold;
        match self.config.kind {
            AlarmKind::AboveThreshold => (value > threshold, false),
            AlarmKind::BelowThreshold => (value < threshold, false),
            AlarmKind::RateOfChange => (value > threshold, value < -threshold),
            AlarmKind::GenericTrigger => (value != 0.0, false),
        }
    }

    /// Feeds one reading through the state machine.
    ///
    /// Returns the edges it produced, in channel order. Events are returned
    /// whether or not the alarm is enabled; muting is the dispatcher's concern.
    pub fn evaluate(&mut self, value: f64, now: DateTime<Utc>) -> Vec<TransitionEvent> {
        let (holds, down_holds) = self.qualifies(value);
        let persistence = self.config.persistence_count.max(1);
        let latch = self.config.latch_duration();

        self.last_value = Some(value);
        self.last_evaluated_at = Some(now);

        let mut events = Vec::new();
        match self.config.kind {
            AlarmKind::RateOfChange => {
                if let Some(direction) = self.primary.step(holds, now, persistence, latch) {
                    events.push(self.event(direction, Channel::Up, value, now));
                }
                if let Some(direction) = self.down.step(down_holds, now, persistence, latch) {
                    events.push(self.event(direction, Channel::Down, value, now));
                }
            }
            _ => {
                if let Some(direction) = self.primary.step(holds, now, persistence, latch) {
                    events.push(self.event(direction, Channel::Level, value, now));
                }
            }
        }
        events
    }

    /// Releases latches whose window has passed, independent of new readings.
    ///
    /// Idempotent: a second call at the same instant returns nothing.
    pub fn clear(&mut self, now: DateTime<Utc>) -> Vec<TransitionEvent> {
        let latch = self.config.latch_duration();
        let value = self.last_value.unwrap_or(f64::NAN);
        let primary_channel = match self.config.kind {
            AlarmKind::RateOfChange => Channel::Up,
            _ => Channel::Level,
        };

        let mut events = Vec::new();
        if let Some(direction) = self.primary.expire(now, latch) {
            events.push(self.event(direction, primary_channel, value, now));
        }
        if let Some(direction) = self.down.expire(now, latch) {
            events.push(self.event(direction, Channel::Down, value, now));
        }
        events
    }

    fn event(&self, direction: Direction, channel: Channel, value: f64, now: DateTime<Utc>) -> TransitionEvent {
        TransitionEvent {
            alarm_name: self.config.name.clone(),
            metric: self.config.metric.clone(),
            direction,
            channel,
            value,
            timestamp: now,
        }
    }

    /// Read-only snapshot for display.
    pub fn status(&self) -> AlarmStatus {
        let rate = self.config.kind == AlarmKind::RateOfChange;
        let triggered_at = match (self.primary.triggered_at, self.down.triggered_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        AlarmStatus {
            name: self.config.name.clone(),
            metric: self.config.metric.clone(),
            kind: self.config.kind,
            is_triggered: self.is_triggered(),
            triggered_at,
            is_enabled: self.enabled,
            phase: self.phase(),
            qualifying_count: self.primary.qualifying_count.max(self.down.qualifying_count),
            up_triggered: rate.then_some(self.primary.triggered),
            down_triggered: rate.then_some(self.down.triggered),
            last_value: self.last_value,
            last_evaluated_at: self.last_evaluated_at,
        }
    }

    fn phase(&self) -> AlarmPhase {
        let phases = [self.primary.phase(), self.down.phase()];
        [AlarmPhase::Triggered, AlarmPhase::Latched, AlarmPhase::Accumulating]
            .into_iter()
            .find(|p| phases.contains(p))
            .unwrap_or(AlarmPhase::Idle)
    }
}

/// Alarm snapshot returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmStatus {
    pub name: String,
    pub metric: String,
    pub kind: AlarmKind,
    pub is_triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub is_enabled: bool,
    pub phase: AlarmPhase,
    pub qualifying_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_triggered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_triggered: Option<bool>,
    pub last_value: Option<f64>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

// ==========================================
// SECTION 5: TESTS
// ==========================================
