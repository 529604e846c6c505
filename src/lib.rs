//! STRATUS - Station Telemetry Alarm and Radiation Utilities
//!
//! Alarm evaluation for unattended weather stations. Readings are fed to
//! debounced, latching alarms; transitions are handed to a bounded
//! notification queue drained by a background worker, so evaluation never
//! waits on e-mail or external programs. A solar ephemeris and clear-sky
//! model publish the theoretical maximum irradiance alongside the readings.
//!
//! # Feature Flags
//!
//! - `email` (default): SMTP delivery through lettre
//! - `metrics`: counters for transitions, drops and delivery failures
//!
//! # Examples
//!
//! ```rust
//! use chrono::Utc;
//! use stratus::{AlarmConfig, AlarmEngine, AlarmKind, DispatchHandle};
//!
//! let engine = AlarmEngine::new(DispatchHandle::new(64));
//! engine.register_or_replace(
//!     AlarmConfig::new("frost", "temperature", AlarmKind::BelowThreshold, 0.0).with_persistence(2),
//! )?;
//!
//! engine.evaluate("temperature", -1.0, Utc::now());
//! engine.evaluate("temperature", -1.5, Utc::now());
//! assert!(engine.status("frost")?.is_triggered);
//! # Ok::<(), stratus::MonitorError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type shared by every module
pub mod error;

/// Latest reading per metric
pub mod signal;

/// Alarm definitions and their debounce/latch state machines
pub mod alarms;

/// Alarm registry and evaluation entry points
pub mod engine;

/// Notification queue, worker and transports
pub mod notify;

/// Solar ephemeris and clear-sky irradiance
pub mod solar;

/// YAML configuration
pub mod config;

/// Event loop tying input, sweeps and solar updates together
pub mod agent;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use agent::{Agent, Command};
pub use alarms::{
    AlarmConfig, AlarmKind, AlarmPhase, AlarmState, AlarmStatus, Channel, Direction, NotifyConfig,
    TransitionEvent,
};
pub use config::Config;
pub use engine::{AlarmEngine, EngineStats, ReloadSummary};
pub use error::{MonitorError, Result};
pub use notify::{
    ActionRunner, DispatchHandle, EmailSender, NotificationDispatcher, ProcessActionRunner, Transports,
};
pub use signal::{Reading, ReadingBus};
pub use solar::{ClearSkyModel, SolarCalculator, SolarOptions, SolarPosition, SunshineCriteria};

#[cfg(feature = "email")]
pub use notify::SmtpEmailSender;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
