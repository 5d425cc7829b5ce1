//! prescaled: the prescale daemon.
//!
//! Loads one autoscaler configuration, wires the Kubernetes, Prometheus,
//! forecasting, notification and telemetry integrations, and runs the
//! control loop until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```text
//! prescaled run --config /etc/prescale/webapp.toml
//! prescaled check-config --config /etc/prescale/webapp.toml
//! ```

mod wiring;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prescale_autoscale::Controller;
use prescale_core::AutoscalerConfig;

const DEFAULT_LOG_FILTER: &str = "info,prescaled=debug,prescale=debug";

#[derive(Parser, Debug)]
#[command(name = "prescaled", about = "Proactive and reactive autoscaler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop.
    Run {
        /// Path to the autoscaler configuration file.
        #[arg(long, env = "PRESCALE_CONFIG")]
        config: PathBuf,
    },
    /// Parse and validate a configuration file, then exit.
    CheckConfig {
        #[arg(long, env = "PRESCALE_CONFIG")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<AutoscalerConfig> {
    AutoscalerConfig::from_file(path)
        .with_context(|| format!("invalid configuration {}", path.display()))
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&path)?;
    info!(
        path = %path.display(),
        deployment = %config.workload.deployment,
        source = %config.metrics.source,
        proactive = config.strategy.proactive_enabled,
        reactive = config.strategy.reactive_enabled,
        "configuration is valid"
    );
    println!("{}: ok", path.display());
    Ok(())
}

/// Install the shutdown handlers. The returned future resolves with the
/// name of the first signal received.
#[cfg(unix)]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install the SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install the SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = &'static str>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    })
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&path)?;

    // Kubernetes stops pods with SIGTERM; both signals end the loop
    // cleanly so the stopped mode gets reported.
    let signal = shutdown_signal()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let name = signal.await;
        info!(signal = name, "shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!(
        path = %path.display(),
        namespace = %config.workload.namespace,
        deployment = %config.workload.deployment,
        "prescale daemon starting"
    );

    let collaborators = wiring::build_collaborators(&config).await?;
    let mut controller = Controller::new(config, collaborators);
    controller.run(shutdown_rx).await;

    info!("prescale daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from(["prescaled", "run", "--config", "/etc/prescale.toml"]).unwrap();
        assert!(!cli.log_json);
        match cli.command {
            Command::Run { config } => assert_eq!(config, PathBuf::from("/etc/prescale.toml")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn log_json_is_global() {
        let cli = Cli::try_parse_from([
            "prescaled",
            "check-config",
            "--config",
            "a.toml",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::CheckConfig { .. }));
    }

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_LOG_FILTER.parse::<EnvFilter>().is_ok());
    }
}
