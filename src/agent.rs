// src/agent.rs - event loop feeding readings, sweeps and solar updates to the engine

use crate::config::Config;
use crate::engine::{AlarmEngine, ReloadSummary};
use crate::solar::{SolarCalculator, SolarMaxReading};
use crate::{MonitorError, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Clear-sky maximum irradiance (W/m²)
pub const SOLAR_MAX_METRIC: &str = "solar_max";
/// Sun elevation above the horizon (degrees)
pub const SOLAR_ELEVATION_METRIC: &str = "solar_elevation";
/// 1 while the measured irradiance counts as sunshine, else 0
pub const SUNSHINE_METRIC: &str = "sunshine";
/// Number of sensor metrics that have gone quiet
pub const DATA_STOPPED_METRIC: &str = "data_stopped";

const DERIVED_METRICS: [&str; 4] = [SOLAR_MAX_METRIC, SOLAR_ELEVATION_METRIC, SUNSHINE_METRIC, DATA_STOPPED_METRIC];

/// One line of agent input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reading {
        metric: String,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    },
    Status,
    Enable(String),
    Disable(String),
    Reload,
}

impl Command {
    /// Parses `metric value [rfc3339]` or a control word. Blank lines and
    /// `#` comments yield `None`.
    ///
    /// An unparseable value becomes NaN so the reading still reaches the
    /// engine and resets any persistence count.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();

        let command = match (head, rest.as_slice()) {
            ("status", []) => Command::Status,
            ("reload", []) => Command::Reload,
            ("enable", [name]) => Command::Enable(name.to_string()),
            ("disable", [name]) => Command::Disable(name.to_string()),
            (metric, [value]) => Command::Reading {
                metric: metric.to_string(),
                value: parse_value(value),
                timestamp: None,
            },
            (metric, [value, timestamp]) => {
                let timestamp = DateTime::parse_from_rfc3339(timestamp)
                    .map_err(|e| MonitorError::InvalidInput(format!("bad timestamp '{}': {}", timestamp, e)))?
                    .with_timezone(&Utc);
                Command::Reading {
                    metric: metric.to_string(),
                    value: parse_value(value),
                    timestamp: Some(timestamp),
                }
            }
            _ => return Err(MonitorError::InvalidInput(format!("unrecognised line '{}'", line))),
        };
        Ok(Some(command))
    }
}

fn parse_value(raw: &str) -> f64 {
    raw.parse().unwrap_or_else(|_| {
        debug!("Unparseable value '{}' ingested as NaN", raw);
        f64::NAN
    })
}

#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::hangup())?))
    }

    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

/// Station agent: owns the configuration and drives the engine.
pub struct Agent {
    config: Config,
    config_path: Option<PathBuf>,
    engine: Arc<AlarmEngine>,
    solar: SolarCalculator,
    stale: Vec<String>,
}

impl Agent {
    pub fn new(config: Config, engine: Arc<AlarmEngine>) -> Self {
        let solar = config.solar_calculator();
        Self {
            config,
            config_path: None,
            engine,
            solar,
            stale: Vec::new(),
        }
    }

    /// File re-read on SIGHUP or the `reload` command.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<AlarmEngine> {
        &self.engine
    }

    /// Evaluates one reading and, for the solar sensor, the derived
    /// sunshine flag. Returns the number of transitions.
    pub fn ingest(&self, metric: &str, value: f64, now: DateTime<Utc>) -> usize {
        let mut produced = self.engine.evaluate(metric, value, now);
        if metric == self.config.solar.solar_metric {
            let clear_sky = self.solar.solar_max(now).irradiance_wm2;
            let sunny = self.config.solar.sunshine.is_sunny(value, clear_sky);
            debug!("Sunshine: measured {} W/m² against clear-sky {} W/m² -> {}", value, clear_sky, sunny);
            produced += self.engine.evaluate(SUNSHINE_METRIC, if sunny { 1.0 } else { 0.0 }, now);
        }
        produced
    }

    /// Publishes the clear-sky maximum and sun elevation.
    pub fn solar_tick(&self, now: DateTime<Utc>) -> SolarMaxReading {
        let reading = self.solar.solar_max(now);
        debug!(
            "Solar max {} W/m² (elevation {:.2}°, factor {:.3})",
            reading.irradiance_wm2, reading.position.elevation_deg, reading.factor
        );
        self.engine.evaluate(SOLAR_MAX_METRIC, f64::from(reading.irradiance_wm2), now);
        self.engine.evaluate(SOLAR_ELEVATION_METRIC, reading.position.elevation_deg, now);
        reading
    }

    /// Ages out latches and, when configured, reports silent sensors.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut produced = self.engine.periodic_sweep(now);

        if let Some(minutes) = self.config.engine.stale_after_minutes {
            let cutoff = now - Duration::minutes(minutes as i64);
            let stale: Vec<String> = self
                .engine
                .readings()
                .stale_since(cutoff)
                .into_iter()
                .filter(|metric| !DERIVED_METRICS.contains(&metric.as_str()))
                .collect();
            if stale != self.stale {
                if stale.is_empty() {
                    info!("All metrics reporting again");
                } else {
                    warn!("No data for {} minutes from: {}", minutes, stale.join(", "));
                }
            }
            produced += self.engine.evaluate(DATA_STOPPED_METRIC, stale.len() as f64, now);
            self.stale = stale;
        }
        produced
    }

    /// Re-reads the configuration file. On any error the running
    /// configuration and alarm set stay in place.
    pub fn reload(&mut self) -> Result<ReloadSummary> {
        let path = self
            .config_path
            .clone()
            .ok_or_else(|| MonitorError::Config("no configuration file to reload".to_string()))?;
        let config = Config::from_file(&path)?;
        let summary = self.engine.reload(config.alarm_configs())?;
        let pending = self.config.restart_required(&config);
        if !pending.is_empty() {
            warn!(
                "Changes to {} take effect only after a restart",
                pending.join(" and ")
            );
        }
        self.solar = config.solar_calculator();
        self.config = config;
        info!("Reloaded configuration from {}", path.display());
        Ok(summary)
    }

    fn reload_logged(&mut self) {
        if let Err(e) = self.reload() {
            error!("Configuration reload rejected, keeping previous alarms: {}", e);
        }
    }

    /// Handles one input line. Only output errors are returned; bad input is logged.
    pub async fn handle_line<W>(&mut self, line: &str, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let command = match Command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("{}", e);
                return Ok(());
            }
        };

        match command {
            Command::Reading { metric, value, timestamp } => {
                self.ingest(&metric, value, timestamp.unwrap_or_else(Utc::now));
            }
            Command::Status => {
                for status in self.engine.statuses() {
                    let mut json = serde_json::to_string(&status)?;
                    json.push('\n');
                    output.write_all(json.as_bytes()).await?;
                }
                output.flush().await?;
            }
            Command::Enable(name) => {
                if let Err(e) = self.engine.set_enabled(&name, true) {
                    warn!("{}", e);
                }
            }
            Command::Disable(name) => {
                if let Err(e) = self.engine.set_enabled(&name, false) {
                    warn!("{}", e);
                }
            }
            Command::Reload => self.reload_logged(),
        }
        Ok(())
    }

    /// Runs until Ctrl-C or end of input.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(
            "Agent running for station '{}' with {} alarms",
            self.config.station.name,
            self.engine.len()
        );

        let mut tickers = Tickers::new(&self.config);
        let mut hangup = Hangup::install()?;
        let mut lines = input.lines();

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = tickers.sweep.tick() => {
                    self.sweep(Utc::now());
                }
                _ = tickers.solar.tick(), if self.config.solar.enabled => {
                    self.solar_tick(Utc::now());
                }
                Some(()) = hangup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    self.reload_logged();
                }
                line = lines.next_line() => match line? {
                    Some(line) => self.handle_line(&line, &mut output).await?,
                    None => {
                        info!("Input closed");
                        break;
                    }
                },
            }
            // Either reload path may have changed the periods
            tickers.refresh(&self.config);
        }
        Ok(())
    }
}

/// Sweep and solar timers, rebuilt when their configured periods change.
struct Tickers {
    sweep: Interval,
    solar: Interval,
}

impl Tickers {
    fn new(config: &Config) -> Self {
        Self {
            sweep: ticker(config.sweep_interval()),
            solar: ticker(config.solar_interval()),
        }
    }

    fn refresh(&mut self, config: &Config) {
        if self.sweep.period() != config.sweep_interval() {
            info!("Sweep interval now {:?}", config.sweep_interval());
            self.sweep = ticker(config.sweep_interval());
        }
        if self.solar.period() != config.solar_interval() {
            info!("Solar interval now {:?}", config.solar_interval());
            self.solar = ticker(config.solar_interval());
        }
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::{AlarmConfig, AlarmKind};
    use crate::notify::DispatchHandle;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::io::BufReader;

    const CONFIG: &str = r#"
station: { name: Test, latitude: 51.5, longitude: 0.0 }
engine: { stale_after_minutes: 10 }
alarms:
  high_temp:
    metric: temperature
    kind: above_threshold
    threshold: 30
  sunny:
    metric: sunshine
    kind: generic_trigger
  silent:
    metric: data_stopped
    kind: generic_trigger
"#;

    fn agent() -> Agent {
        let config = Config::from_yaml(CONFIG).unwrap();
        let engine = AlarmEngine::from_configs(config.alarm_configs(), DispatchHandle::new(16)).unwrap();
        Agent::new(config, Arc::new(engine))
    }

    fn summer_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(Command::parse("# comment").unwrap(), None);
        assert_eq!(Command::parse("status").unwrap(), Some(Command::Status));
        assert_eq!(Command::parse("disable high_temp").unwrap(), Some(Command::Disable("high_temp".into())));
        assert_eq!(
            Command::parse("temperature 21.5").unwrap(),
            Some(Command::Reading { metric: "temperature".into(), value: 21.5, timestamp: None })
        );
        match Command::parse("temperature 21.5 2024-06-21T12:00:00Z").unwrap() {
            Some(Command::Reading { timestamp, .. }) => assert_eq!(timestamp, Some(summer_noon())),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Command::parse("temperature 1 yesterday").is_err());
        assert!(Command::parse("a b c d").is_err());
    }

    #[test]
    fn test_unparseable_value_is_nan() {
        match Command::parse("temperature ???").unwrap() {
            Some(Command::Reading { value, .. }) => assert!(value.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sunshine_derived_from_solar_metric() {
        let agent = agent();
        agent.ingest("solar_radiation", 950.0, summer_noon());
        assert_eq!(agent.engine().readings().value(SUNSHINE_METRIC), Some(1.0));
        assert!(agent.engine().status("sunny").unwrap().is_triggered);

        agent.ingest("solar_radiation", 100.0, summer_noon());
        assert_eq!(agent.engine().readings().value(SUNSHINE_METRIC), Some(0.0));
        assert!(!agent.engine().status("sunny").unwrap().is_triggered);
    }

    #[test]
    fn test_solar_tick_publishes_readings() {
        let agent = agent();
        let reading = agent.solar_tick(summer_noon());
        assert!(reading.irradiance_wm2 > 0);
        let readings = agent.engine().readings();
        assert_eq!(readings.value(SOLAR_MAX_METRIC), Some(f64::from(reading.irradiance_wm2)));
        assert!(readings.value(SOLAR_ELEVATION_METRIC).unwrap() > 60.0);
    }

    #[test]
    fn test_sweep_reports_stopped_data() {
        let mut agent = agent();
        agent.ingest("temperature", 20.0, summer_noon());
        agent.solar_tick(summer_noon());

        agent.sweep(summer_noon() + Duration::minutes(5));
        assert_eq!(agent.engine().readings().value(DATA_STOPPED_METRIC), Some(0.0));

        agent.sweep(summer_noon() + Duration::minutes(11));
        assert_eq!(agent.engine().readings().value(DATA_STOPPED_METRIC), Some(1.0));
        assert!(agent.engine().status("silent").unwrap().is_triggered);

        agent.ingest("temperature", 20.0, summer_noon() + Duration::minutes(12));
        agent.sweep(summer_noon() + Duration::minutes(13));
        assert!(!agent.engine().status("silent").unwrap().is_triggered);
    }

    #[test]
    fn test_reload_keeps_previous_on_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let mut agent = agent().with_config_path(file.path());
        agent.ingest("temperature", 31.0, summer_noon());

        std::fs::write(file.path(), "station: { latitude: 200, longitude: 0 }").unwrap();
        assert!(agent.reload().is_err());
        assert_eq!(agent.engine().len(), 3);
        assert!(agent.engine().status("high_temp").unwrap().is_triggered);

        let trimmed = CONFIG.replace("  silent:\n    metric: data_stopped\n    kind: generic_trigger\n", "");
        std::fs::write(file.path(), trimmed).unwrap();
        let summary = agent.reload().unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.unchanged, 2);
        assert!(agent.engine().status("high_temp").unwrap().is_triggered);
    }

    #[tokio::test]
    async fn test_reload_command_updates_tick_periods() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let mut agent = agent().with_config_path(file.path());
        let mut tickers = Tickers::new(agent.config());
        assert_eq!(tickers.sweep.period(), std::time::Duration::from_secs(60));

        let faster = CONFIG.replace(
            "engine: { stale_after_minutes: 10 }",
            "engine: { stale_after_minutes: 10, sweep_interval_secs: 5 }\nsolar: { interval_secs: 30 }",
        );
        std::fs::write(file.path(), faster).unwrap();
        let mut output = Vec::new();
        agent.handle_line("reload", &mut output).await.unwrap();
        tickers.refresh(agent.config());

        assert_eq!(tickers.sweep.period(), std::time::Duration::from_secs(5));
        assert_eq!(tickers.solar.period(), std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_reload_without_path_fails() {
        assert!(matches!(agent().reload(), Err(MonitorError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_until_eof() {
        let mut agent = agent();
        agent
            .engine()
            .register_or_replace(AlarmConfig::new("low_temp", "temperature", AlarmKind::BelowThreshold, 0.0))
            .unwrap();

        let input = "temperature 31\nnot a valid line at all\ndisable high_temp\nstatus\n";
        let mut output = Vec::new();
        agent.run(BufReader::new(input.as_bytes()), &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let statuses: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(statuses.len(), 4);
        let high = statuses.iter().find(|s| s["name"] == "high_temp").unwrap();
        assert_eq!(high["is_triggered"], true);
        assert_eq!(high["is_enabled"], false);
    }
}
