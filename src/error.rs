use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding status snapshots
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed line on the ingestion input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested alarm is not registered with the engine
    #[error("Alarm not found: {0}")]
    AlarmNotFound(String),

    /// An e-mail or external action could not be delivered.
    ///
    /// Logged by the dispatcher and dropped; never returned to the
    /// evaluation caller.
    #[error("Notification delivery failed for alarm '{alarm}' via {channel}: {reason}")]
    NotificationDeliveryFailed {
        alarm: String,
        channel: &'static str,
        reason: String,
    },

    /// The dispatcher has been shut down
    #[error("Dispatcher is shut down")]
    Shutdown,
}

impl MonitorError {
    /// Shorthand for a delivery failure on the given transport.
    pub fn delivery(alarm: impl Into<String>, channel: &'static str, reason: impl ToString) -> Self {
        MonitorError::NotificationDeliveryFailed {
            alarm: alarm.into(),
            channel,
            reason: reason.to_string(),
        }
    }
}

/// Convenient alias over [`Result`] using [`MonitorError`]
pub type Result<T> = std::result::Result<T, MonitorError>;
