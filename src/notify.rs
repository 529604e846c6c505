//! Asynchronous alarm notification.
//!
//! The engine hands transition events to a [`DispatchHandle`], which only
//! pushes onto a bounded in-memory queue and returns. A single worker task
//! owned by [`NotificationDispatcher`] drains the queue and performs the
//! e-mail and external-action side effects. Delivery is best effort: one
//! attempt per event, failures are logged and dropped, and when the queue is
//! full the oldest pending event is discarded.

use crate::alarms::{AlarmConfig, Direction, TransitionEvent};
use crate::{MonitorError, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use metrics::counter;

const DEFAULT_RISING_TEMPLATE: &str =
    "Alarm {name} is active: {metric} reading {value}{units} crossed threshold {threshold}{units} ({channel}) at {time}";

const DEFAULT_FALLING_TEMPLATE: &str = "Alarm {name} has cleared: {metric} reading {value}{units} at {time}";

// ============================================================================
// TRANSPORT SEAMS
// ============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, subject: &str, body: &str) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Starts `command`. Must not wait for the program to finish.
    async fn start(&self, command: &str, args: &[String]) -> Result<()>;
}

/// Collaborators used by the worker. Absent transports are skipped.
#[derive(Clone, Default)]
pub struct Transports {
    pub email: Option<Arc<dyn EmailSender>>,
    pub action: Option<Arc<dyn ActionRunner>>,
}

// ============================================================================
// QUEUE
// ============================================================================

/// A transition together with the alarm definition that produced it
#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub event: TransitionEvent,
    pub alarm: Arc<AlarmConfig>,
}

/// What happened to an event handed to [`DispatchHandle::notify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after discarding the oldest pending event
    QueuedDroppedOldest,
    /// Dispatcher already shut down; event discarded
    Rejected,
}

/// Counters since the queue was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub pending: usize,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
    pub suppressed: u64,
}

struct DispatchQueue {
    jobs: Mutex<VecDeque<NotificationJob>>,
    capacity: usize,
    wakeup: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
}

/// Cheap, cloneable producer side of the dispatch queue. Never blocks.
#[derive(Clone)]
pub struct DispatchHandle {
    queue: Arc<DispatchQueue>,
}

impl DispatchHandle {
    /// Creates an empty queue holding at most `capacity` pending events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Arc::new(DispatchQueue {
                jobs: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                wakeup: Notify::new(),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                suppressed: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueues a transition for delivery.
    pub fn notify(&self, event: TransitionEvent, alarm: Arc<AlarmConfig>) -> EnqueueOutcome {
        if self.is_closed() {
            warn!(
                "Dispatcher shut down; discarding {} transition for alarm '{}'",
                event.direction, event.alarm_name
            );
            return EnqueueOutcome::Rejected;
        }

        let mut outcome = EnqueueOutcome::Queued;
        {
            let mut jobs = self.queue.jobs.lock();
            if jobs.len() >= self.queue.capacity {
                if let Some(oldest) = jobs.pop_front() {
                    warn!(
                        "Notification queue full ({}); dropping oldest {} event for alarm '{}'",
                        self.queue.capacity, oldest.event.direction, oldest.event.alarm_name
                    );
                    self.queue.dropped.fetch_add(1, Ordering::Relaxed);
                    #[cfg(feature = "metrics")]
                    counter!("stratus_notifications_dropped_total").increment(1);
                    outcome = EnqueueOutcome::QueuedDroppedOldest;
                }
            }
            jobs.push_back(NotificationJob { event, alarm });
        }
        self.queue.wakeup.notify_one();
        outcome
    }

    /// Counts a transition that was not enqueued because its alarm is muted.
    pub fn record_suppressed(&self) {
        self.queue.suppressed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("stratus_notifications_suppressed_total").increment(1);
    }

    pub fn pending(&self) -> usize {
        self.queue.jobs.lock().len()
    }

    /// Removes and returns all pending jobs.
    pub fn drain(&self) -> Vec<NotificationJob> {
        self.queue.jobs.lock().drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            pending: self.pending(),
            dropped: self.queue.dropped.load(Ordering::Relaxed),
            delivered: self.queue.delivered.load(Ordering::Relaxed),
            failed: self.queue.failed.load(Ordering::Relaxed),
            suppressed: self.queue.suppressed.load(Ordering::Relaxed),
        }
    }

    fn close(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.wakeup.notify_one();
    }

    fn pop(&self) -> Option<NotificationJob> {
        self.queue.jobs.lock().pop_front()
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Result of [`NotificationDispatcher::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Worker finished within the grace period
    pub flushed: bool,
    /// Events still pending when the grace period ran out
    pub discarded: usize,
}

/// Owns the worker task that drains a [`DispatchHandle`].
pub struct NotificationDispatcher {
    handle: DispatchHandle,
    worker: JoinHandle<()>,
}

impl NotificationDispatcher {
    /// Creates a queue and starts its worker. Requires a tokio runtime.
    pub fn start(capacity: usize, transports: Transports) -> Self {
        Self::attach(DispatchHandle::new(capacity), transports)
    }

    /// Starts a worker draining an existing queue.
    pub fn attach(handle: DispatchHandle, transports: Transports) -> Self {
        let worker_handle = handle.clone();
        let worker = tokio::spawn(async move {
            run_worker(worker_handle, transports).await;
        });
        Self { handle, worker }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stops accepting events and lets the worker flush for up to `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.handle.close();

        match tokio::time::timeout(grace, &mut self.worker).await {
            Ok(Ok(())) => {
                info!("Notification dispatcher flushed and stopped");
                ShutdownReport { flushed: true, discarded: 0 }
            }
            Ok(Err(e)) => {
                error!("Notification worker ended abnormally: {}", e);
                let discarded = self.handle.drain().len();
                ShutdownReport { flushed: false, discarded }
            }
            Err(_) => {
                self.worker.abort();
                let discarded = self.handle.drain().len();
                warn!(
                    "Notification dispatcher did not flush within {:?}; discarding {} pending events",
                    grace, discarded
                );
                ShutdownReport { flushed: false, discarded }
            }
        }
    }
}

async fn run_worker(handle: DispatchHandle, transports: Transports) {
    debug!("Notification worker started");
    loop {
        match handle.pop() {
            Some(job) => deliver(&handle, &transports, job).await,
            None => {
                if handle.is_closed() {
                    break;
                }
                handle.queue.wakeup.notified().await;
            }
        }
    }
    debug!("Notification worker stopped");
}

/// Performs the side effects for one job. E-mail and action run
/// concurrently and fail independently.
async fn deliver(handle: &DispatchHandle, transports: &Transports, job: NotificationJob) {
    let NotificationJob { event, alarm } = job;

    if event.direction == Direction::Falling && !alarm.notify.notify_on_clear {
        debug!("Alarm '{}' cleared; clear notifications are off", alarm.name);
        return;
    }

    info!(
        "Dispatching {} notification for alarm '{}' ({} = {})",
        event.direction, alarm.name, event.metric, event.value
    );

    let subject = format!("Alarm {} {}", alarm.name, event.direction);
    let body = render(template_for(&alarm, event.direction), &event, &alarm);

    let email = async {
        if !alarm.notify.email {
            return None;
        }
        let Some(sender) = transports.email.as_ref() else {
            debug!("Alarm '{}' wants e-mail but no SMTP transport is configured", alarm.name);
            return None;
        };
        Some(
            sender
                .send_email(&subject, &body)
                .await
                .map_err(|e| MonitorError::delivery(alarm.name.as_str(), "email", e)),
        )
    };

    let action = async {
        let command = alarm.notify.action.as_ref()?;
        let Some(runner) = transports.action.as_ref() else {
            debug!("Alarm '{}' has an action but no action runner is configured", alarm.name);
            return None;
        };
        let args: Vec<String> = command.args.iter().map(|a| render(a, &event, &alarm)).collect();
        Some(
            runner
                .start(&command.command, &args)
                .await
                .map_err(|e| MonitorError::delivery(alarm.name.as_str(), "action", e)),
        )
    };

    let (email_result, action_result) = futures::join!(email, action);

    for result in [email_result, action_result].into_iter().flatten() {
        match result {
            Ok(()) => {
                handle.queue.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("{}", e);
                handle.queue.failed.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!("stratus_notification_failures_total").increment(1);
            }
        }
    }
}

// ============================================================================
// MESSAGE RENDERING
// ============================================================================

fn template_for(alarm: &AlarmConfig, direction: Direction) -> &str {
    match direction {
        Direction::Rising => alarm.notify.rising_template.as_deref().unwrap_or(DEFAULT_RISING_TEMPLATE),
        Direction::Falling => alarm.notify.falling_template.as_deref().unwrap_or(DEFAULT_FALLING_TEMPLATE),
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() {
        format!("{:.2}", value)
    } else {
        "n/a".to_string()
    }
}

/// Substitutes `{name}`, `{metric}`, `{value}`, `{threshold}`, `{units}`,
/// `{direction}`, `{channel}` and `{time}` in `template`.
pub fn render(template: &str, event: &TransitionEvent, alarm: &AlarmConfig) -> String {
    template
        .replace("{name}", &alarm.name)
        .replace("{metric}", &event.metric)
        .replace("{value}", &format_number(event.value))
        .replace("{threshold}", &format_number(alarm.threshold))
        .replace("{units}", &alarm.units)
        .replace("{direction}", &event.direction.to_string())
        .replace("{channel}", &event.channel.to_string())
        .replace("{time}", &event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// ============================================================================
// TRANSPORT IMPLEMENTATIONS
// ============================================================================

/// Starts alarm actions as detached child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessActionRunner;

#[async_trait]
impl ActionRunner for ProcessActionRunner {
    async fn start(&self, command: &str, args: &[String]) -> Result<()> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        debug!("Started alarm action '{}' (pid {:?})", command, child.id());
        let command = command.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("Alarm action '{}' exited cleanly", command),
                Ok(status) => warn!("Alarm action '{}' exited with {}", command, status),
                Err(e) => warn!("Could not wait for alarm action '{}': {}", command, e),
            }
        });
        Ok(())
    }
}

/// SMTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Use STARTTLS; plain connections are only for local relays
    #[serde(default = "default_true")]
    pub starttls: bool,

    pub from: String,

    pub to: Vec<String>,

    /// Prepended to every subject, e.g. `[Hilltop]`
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

impl SmtpConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(MonitorError::Config("SMTP host must not be empty".to_string()));
        }
        if self.to.is_empty() {
            return Err(MonitorError::Config("SMTP recipient list is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpEmailSender;

#[cfg(feature = "email")]
mod smtp {
    use super::{EmailSender, SmtpConfig};
    use crate::{MonitorError, Result};
    use async_trait::async_trait;
    use lettre::message::Mailbox;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};
    use tracing::info;

    /// E-mail delivery through an SMTP relay using lettre
    pub struct SmtpEmailSender {
        config: SmtpConfig,
    }

    impl SmtpEmailSender {
        /// Validates addresses up front so bad config fails at load time.
        pub fn new(config: SmtpConfig) -> Result<Self> {
            config.validate()?;
            parse_mailbox(&config.from)?;
            for to in &config.to {
                parse_mailbox(to)?;
            }
            Ok(Self { config })
        }

        fn build_message(&self, subject: &str, body: &str) -> Result<Message> {
            let subject = match &self.config.subject_prefix {
                Some(prefix) => format!("{} {}", prefix, subject),
                None => subject.to_string(),
            };
            let mut builder = Message::builder().from(parse_mailbox(&self.config.from)?);
            for to in &self.config.to {
                builder = builder.to(parse_mailbox(to)?);
            }
            builder
                .subject(subject)
                .body(body.to_string())
                .map_err(|e| MonitorError::Config(format!("Failed to build email: {}", e)))
        }

        fn transport(&self) -> Result<SmtpTransport> {
            let builder = if self.config.starttls {
                SmtpTransport::starttls_relay(&self.config.host)
                    .map_err(|e| MonitorError::Config(format!("Invalid SMTP host: {}", e)))?
            } else {
                SmtpTransport::builder_dangerous(&self.config.host)
            };
            let builder = builder.port(self.config.port);
            let builder = match (&self.config.username, &self.config.password) {
                (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
                _ => builder,
            };
            Ok(builder.build())
        }
    }

    fn parse_mailbox(address: &str) -> Result<Mailbox> {
        address
            .parse()
            .map_err(|e| MonitorError::Config(format!("Invalid email address '{}': {}", address, e)))
    }

    #[async_trait]
    impl EmailSender for SmtpEmailSender {
        async fn send_email(&self, subject: &str, body: &str) -> Result<()> {
            let message = self.build_message(subject, body)?;
            let mailer = self.transport()?;
            info!("Sending email to {}: {}", self.config.to.join(", "), subject);

            // lettre's SmtpTransport is blocking
            tokio::task::spawn_blocking(move || mailer.send(&message))
                .await
                .map_err(|e| MonitorError::Io(std::io::Error::other(e.to_string())))?
                .map_err(|e| MonitorError::Io(std::io::Error::other(format!("Failed to send email: {}", e))))?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn config() -> SmtpConfig {
            SmtpConfig {
                host: "smtp.example.com".to_string(),
                port: 587,
                username: None,
                password: None,
                starttls: true,
                from: "station@example.com".to_string(),
                to: vec!["ops@example.com".to_string(), "Duty <duty@example.com>".to_string()],
                subject_prefix: Some("[Hilltop]".to_string()),
            }
        }

        #[test]
        fn test_rejects_bad_address() {
            let mut bad = config();
            bad.to.push("not an address".to_string());
            assert!(SmtpEmailSender::new(bad).is_err());
        }

        #[test]
        fn test_builds_message() {
            let sender = SmtpEmailSender::new(config()).unwrap();
            let message = sender.build_message("Alarm hi rising", "body").unwrap();
            let raw = String::from_utf8(message.formatted()).unwrap();
            assert!(raw.contains("Subject: [Hilltop] Alarm hi rising"));
            assert!(raw.contains("duty@example.com"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::{ActionConfig, AlarmKind, Channel, NotifyConfig};
    use chrono::{TimeZone, Utc};
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct RecordingEmail {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EmailSender for RecordingEmail {
        async fn send_email(&self, subject: &str, body: &str) -> Result<()> {
            self.sent.lock().push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAction {
        started: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl ActionRunner for RecordingAction {
        async fn start(&self, command: &str, args: &[String]) -> Result<()> {
            self.started.lock().push((command.to_string(), args.to_vec()));
            Ok(())
        }
    }

    /// Blocks every send until a permit is released
    struct GatedEmail {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl EmailSender for GatedEmail {
        async fn send_email(&self, _subject: &str, _body: &str) -> Result<()> {
            let _permit = self.gate.acquire().await.map_err(|_| MonitorError::Shutdown)?;
            Ok(())
        }
    }

    fn alarm(notify: NotifyConfig) -> Arc<AlarmConfig> {
        let mut config = AlarmConfig::new("high_temp", "temperature", AlarmKind::AboveThreshold, 30.0)
            .with_notify(notify);
        config.units = "°C".to_string();
        Arc::new(config)
    }

    fn event(direction: Direction) -> TransitionEvent {
        TransitionEvent {
            alarm_name: "high_temp".to_string(),
            metric: "temperature".to_string(),
            direction,
            channel: Channel::Level,
            value: 31.25,
            timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 14, 30, 0).unwrap(),
        }
    }

    fn email_only() -> NotifyConfig {
        NotifyConfig { email: true, ..NotifyConfig::default() }
    }

    #[test]
    fn test_render_placeholders() {
        let notify = NotifyConfig {
            rising_template: Some("{name}|{metric}|{value}|{threshold}|{units}|{direction}|{channel}|{time}".into()),
            ..NotifyConfig::default()
        };
        let alarm = alarm(notify);
        let text = render(template_for(&alarm, Direction::Rising), &event(Direction::Rising), &alarm);
        assert_eq!(text, "high_temp|temperature|31.25|30.00|°C|rising|level|2024-07-01T14:30:00Z");
    }

    #[test]
    fn test_render_nan_value() {
        let alarm = alarm(NotifyConfig::default());
        let mut ev = event(Direction::Falling);
        ev.value = f64::NAN;
        assert!(render("{value}", &ev, &alarm).contains("n/a"));
        assert!(render(template_for(&alarm, Direction::Falling), &ev, &alarm).contains("cleared"));
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let handle = DispatchHandle::new(2);
        let a = alarm(NotifyConfig::default());
        assert_eq!(handle.notify(event(Direction::Rising), a.clone()), EnqueueOutcome::Queued);
        assert_eq!(handle.notify(event(Direction::Falling), a.clone()), EnqueueOutcome::Queued);
        let mut third = event(Direction::Rising);
        third.value = 40.0;
        assert_eq!(handle.notify(third, a), EnqueueOutcome::QueuedDroppedOldest);

        let stats = handle.stats();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.dropped, 1);

        let jobs = handle.drain();
        assert_eq!(jobs[0].event.direction, Direction::Falling);
        assert_eq!(jobs[1].event.value, 40.0);
    }

    #[tokio::test]
    async fn test_delivers_email_and_action() {
        let email = Arc::new(RecordingEmail::default());
        let action = Arc::new(RecordingAction::default());
        let notify = NotifyConfig {
            email: true,
            action: Some(ActionConfig {
                command: "/usr/local/bin/siren".to_string(),
                args: vec!["--alarm={name}".to_string(), "{value}".to_string()],
            }),
            ..NotifyConfig::default()
        };

        let dispatcher = NotificationDispatcher::start(
            8,
            Transports { email: Some(email.clone()), action: Some(action.clone()) },
        );
        let handle = dispatcher.handle();
        handle.notify(event(Direction::Rising), alarm(notify));

        let report = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert!(report.flushed);

        let sent = email.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Alarm high_temp rising");
        assert!(sent[0].1.contains("31.25°C"));

        let started = action.started.lock();
        assert_eq!(started[0].0, "/usr/local/bin/siren");
        assert_eq!(started[0].1, vec!["--alarm=high_temp".to_string(), "31.25".to_string()]);
        assert_eq!(handle.stats().delivered, 2);
    }

    #[tokio::test]
    async fn test_email_failure_does_not_block_action() {
        let mut email = MockEmailSender::new();
        email
            .expect_send_email()
            .times(1)
            .returning(|_, _| Err(MonitorError::Io(std::io::Error::other("connection refused"))));
        let action = Arc::new(RecordingAction::default());
        let notify = NotifyConfig {
            email: true,
            action: Some(ActionConfig { command: "beep".to_string(), args: vec![] }),
            ..NotifyConfig::default()
        };

        let dispatcher = NotificationDispatcher::start(
            8,
            Transports { email: Some(Arc::new(email)), action: Some(action.clone()) },
        );
        let handle = dispatcher.handle();
        handle.notify(event(Direction::Rising), alarm(notify));
        dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(action.started.lock().len(), 1);
        let stats = handle.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_action_failure_is_counted() {
        let mut runner = MockActionRunner::new();
        runner
            .expect_start()
            .times(1)
            .returning(|_, _| Err(MonitorError::Io(std::io::Error::other("no such file"))));
        let notify = NotifyConfig {
            action: Some(ActionConfig { command: "missing".to_string(), args: vec![] }),
            ..NotifyConfig::default()
        };

        let dispatcher =
            NotificationDispatcher::start(8, Transports { email: None, action: Some(Arc::new(runner)) });
        let handle = dispatcher.handle();
        handle.notify(event(Direction::Rising), alarm(notify));
        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(handle.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_clear_notification_can_be_disabled() {
        let email = Arc::new(RecordingEmail::default());
        let notify = NotifyConfig { email: true, notify_on_clear: false, ..NotifyConfig::default() };
        let dispatcher = NotificationDispatcher::start(8, Transports { email: Some(email.clone()), action: None });
        let handle = dispatcher.handle();
        handle.notify(event(Direction::Rising), alarm(notify.clone()));
        handle.notify(event(Direction::Falling), alarm(notify));
        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(email.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_grace_discards_unflushed() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = NotificationDispatcher::start(
            16,
            Transports { email: Some(Arc::new(GatedEmail { gate: gate.clone() })), action: None },
        );
        let handle = dispatcher.handle();
        for _ in 0..3 {
            handle.notify(event(Direction::Rising), alarm(email_only()));
        }

        let report = dispatcher.shutdown(Duration::from_millis(50)).await;
        assert!(!report.flushed);
        // The worker holds at most one job in flight
        assert!(report.discarded >= 2, "discarded {}", report.discarded);
        assert_eq!(handle.pending(), 0);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let dispatcher = NotificationDispatcher::start(4, Transports::default());
        let handle = dispatcher.handle();
        dispatcher.shutdown(Duration::from_secs(1)).await;
        assert_eq!(
            handle.notify(event(Direction::Rising), alarm(email_only())),
            EnqueueOutcome::Rejected
        );
    }
}
