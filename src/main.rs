use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use thermia::logging::{get_logger, init_logging};
use thermia::{Config, Scheduler};
use tokio::sync::watch;

/// Spot price driven EVU relay control for Thermia heat pumps
#[derive(Debug, Parser)]
#[command(version = env!("APP_VERSION"), about)]
struct Args {
    /// Decide and log, but never switch the relay
    #[arg(long)]
    dry_run: bool,

    /// YAML configuration file (default: first of thermia.yaml, /data/thermia.yaml, /etc/thermia/config.yaml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Invalid configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    let logger = get_logger("main");

    let scheduler = Scheduler::from_config(&config, args.dry_run)
        .context("Failed to set up controller")?;
    let policy = scheduler.policy();
    logger.info(&format!(
        "Thermia controller started (version: {}, dryRun: {}, threshold: {:.2}, activeHours: {}, schedule: {}, timezone: {})",
        env!("APP_VERSION"),
        policy.dry_run,
        policy.threshold.unwrap_or(0.0),
        policy.active_hours.unwrap_or(0),
        policy.schedule,
        policy.timezone
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_logger = get_logger("signal");
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                signal_logger.info("Ctrl-C received, stopping");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would stop the loop; keep it alive
                signal_logger.error(&format!("Failed to listen for Ctrl-C: {e}"));
                std::future::pending::<()>().await;
            }
        }
    });

    match scheduler.run(shutdown_rx).await {
        Ok(()) => {
            logger.info("Controller shutdown complete");
            Ok(())
        }
        Err(e) => {
            logger.error(&format!("Controller failed: {e}"));
            Err(anyhow::anyhow!("Controller error: {e}"))
        }
    }
}
