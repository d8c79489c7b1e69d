//! Embedding surface: hand over a handler and a config, get control back
//! when the worker has shut down.

use crate::config::WorkerConfig;
use crate::error::ConfigError;
use crate::handler::JobHandler;
use crate::session::{Session, SessionStats};
use crate::transport::{TcpTransport, Transport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run a worker over TCP until `shutdown` is cancelled.
///
/// Only configuration problems are reported, including a broker that cannot
/// be reached before the first registration. Transport faults, bad frames and
/// failing jobs are handled inside the session.
pub async fn run<H>(
    config: WorkerConfig,
    handler: H,
    shutdown: CancellationToken,
) -> Result<SessionStats, ConfigError>
where
    H: JobHandler + 'static,
{
    let transport = TcpTransport::new(config.send_timeout());
    run_with_transport(config, Arc::new(handler), transport, shutdown).await
}

/// Same as [`run`] over a caller-supplied transport
pub async fn run_with_transport<T: Transport>(
    config: WorkerConfig,
    handler: Arc<dyn JobHandler>,
    transport: T,
    shutdown: CancellationToken,
) -> Result<SessionStats, ConfigError> {
    Session::new(&config, handler, transport, shutdown)?.run().await
}

/// Blocking variant of [`run`] for hosts without an async runtime. Builds a
/// multi-threaded tokio runtime and parks the calling thread on it.
pub fn run_blocking<H>(
    config: WorkerConfig,
    handler: H,
    shutdown: CancellationToken,
) -> Result<SessionStats, ConfigError>
where
    H: JobHandler + 'static,
{
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ConfigError::Runtime(e.to_string()))?;

    runtime.block_on(run(config, handler, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;

    #[test]
    fn test_run_blocking_rejects_bad_config() {
        let config = WorkerConfig {
            broker_address: "nowhere".to_string(),
            ..Default::default()
        };

        let result = run_blocking(config, EchoHandler, CancellationToken::new());
        assert!(matches!(result, Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_run_blocking_unreachable_broker() {
        // Reserve a port, then release it so nothing is listening there
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let config = WorkerConfig {
            broker_address: format!("127.0.0.1:{}", port),
            initial_connect_attempts: 2,
            reconnect_backoff_base_ms: 5,
            reconnect_backoff_ceiling_ms: 10,
            ..Default::default()
        };

        match run_blocking(config, EchoHandler, CancellationToken::new()) {
            Err(ConfigError::BrokerUnreachable { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("Expected BrokerUnreachable, got {:?}", other),
        }
    }

    #[test]
    fn test_run_blocking_already_cancelled() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = run_blocking(WorkerConfig::default(), EchoHandler, shutdown).unwrap();
        assert_eq!(stats, SessionStats::default());
    }
}
