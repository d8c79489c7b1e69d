//! Command line plumbing shared by the demo workers.

pub mod handlers;

use anyhow::Context;
use clap::Args;
use jobline_worker::{run, JobHandler, SessionStats, WorkerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Args, Debug, Default)]
pub struct WorkerArgs {
    /// Broker address (host:port)
    #[arg(short, long)]
    pub broker: Option<String>,

    /// Worker identity (generated from host and pid if not provided)
    #[arg(long)]
    pub identity: Option<String>,

    /// Number of jobs executed at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Per-job deadline in milliseconds
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Path to a YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl WorkerArgs {
    /// Load the config file, if any, then apply command line overrides
    pub fn worker_config(&self) -> anyhow::Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => WorkerConfig::default(),
        };

        if let Some(broker) = &self.broker {
            config.broker_address = broker.clone();
        }
        if let Some(identity) = &self.identity {
            config.identity_seed = Some(identity.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.execution_concurrency = concurrency;
        }
        if self.deadline_ms.is_some() {
            config.execution_deadline_ms = self.deadline_ms;
        }

        config.validate()?;
        Ok(config)
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Cancelled on the first Ctrl-C
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    shutdown
}

/// Run `handler` against the configured broker until Ctrl-C
pub async fn serve<H>(args: &WorkerArgs, handler: H) -> anyhow::Result<SessionStats>
where
    H: JobHandler + 'static,
{
    let config = args.worker_config()?;
    let stats = run(config, handler, shutdown_on_ctrl_c()).await?;
    Ok(stats)
}

pub fn exit_code(outcome: anyhow::Result<SessionStats>) -> ExitCode {
    match outcome {
        Ok(stats) => {
            info!(
                "Worker finished: {} job(s) accepted, {} result(s) sent",
                stats.jobs_accepted, stats.results_sent
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Worker failed: {:#}", e);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobline_worker::ConfigError;

    #[test]
    fn test_cli_overrides() {
        let args = WorkerArgs {
            broker: Some("10.0.0.2:7000".to_string()),
            identity: Some("squarer".to_string()),
            concurrency: Some(4),
            deadline_ms: Some(250),
            config: None,
        };

        let config = args.worker_config().unwrap();
        assert_eq!(config.broker_address, "10.0.0.2:7000");
        assert_eq!(config.identity(), "squarer");
        assert_eq!(config.execution_concurrency, 4);
        assert_eq!(config.execution_deadline_ms, Some(250));
        assert_eq!(config.heartbeat_interval_ms, WorkerConfig::default().heartbeat_interval_ms);
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let args = WorkerArgs {
            concurrency: Some(0),
            ..Default::default()
        };

        let err = args.worker_config().unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let args = WorkerArgs {
            config: Some(PathBuf::from("/nonexistent/worker.yaml")),
            ..Default::default()
        };

        assert!(args.worker_config().is_err());
    }
}
