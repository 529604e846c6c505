use anyhow::Context;
use std::sync::Arc;
use stratus::{Agent, AlarmEngine, Config, NotificationDispatcher, ProcessActionRunner, Transports};
use tokio::io::BufReader;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("stratus=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Stratus v{} starting", stratus::VERSION);

    let Some(config_path) = std::env::args().nth(1) else {
        error!("Usage: stratus <config.yaml>");
        std::process::exit(2);
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    info!(
        "Loaded station '{}' ({:.4}, {:.4}) with {} alarms",
        config.station.name,
        config.station.latitude,
        config.station.longitude,
        config.alarms.len()
    );

    let transports = build_transports(&config)?;
    let dispatcher = NotificationDispatcher::start(config.dispatcher.queue_capacity, transports);
    let engine = AlarmEngine::from_configs(config.alarm_configs(), dispatcher.handle())
        .context("failed to register alarms")?;

    let mut agent = Agent::new(config, Arc::new(engine)).with_config_path(&config_path);
    let result = agent
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    let report = dispatcher.shutdown(agent.config().shutdown_grace()).await;
    let stats = agent.engine().stats();
    info!(
        "Final stats: {} evaluations, {} transitions, {} notifications discarded",
        stats.evaluations, stats.transitions, report.discarded
    );

    result.context("agent stopped with an error")
}

fn build_transports(config: &Config) -> anyhow::Result<Transports> {
    let mut transports = Transports {
        email: None,
        action: Some(Arc::new(ProcessActionRunner)),
    };

    match &config.smtp {
        #[cfg(feature = "email")]
        Some(smtp) => {
            let sender = stratus::SmtpEmailSender::new(smtp.clone()).context("invalid SMTP configuration")?;
            transports.email = Some(Arc::new(sender));
        }
        #[cfg(not(feature = "email"))]
        Some(_) => {
            tracing::warn!("SMTP configured but stratus was built without the 'email' feature");
        }
        None => info!("No SMTP server configured; e-mail notifications are disabled"),
    }

    Ok(transports)
}
