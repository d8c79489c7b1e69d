use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;
use crate::ledger::JobLedger;
use jobline_protocol::MAX_IDENTITY_LEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Broker endpoint, `host:port`
    pub broker_address: String,
    /// Fixed identity; generated from host and pid when absent
    pub identity_seed: Option<String>,
    pub receive_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub reconnect_backoff_base_ms: u64,
    pub reconnect_backoff_ceiling_ms: u64,
    /// Connection attempts before giving up at startup
    pub initial_connect_attempts: u32,
    pub send_timeout_ms: u64,
    pub execution_concurrency: usize,
    pub execution_deadline_ms: Option<u64>,
    /// How many recent job ids are remembered to drop re-delivered
    /// requests; older duplicates are executed again
    pub ledger_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            broker_address: "127.0.0.1:5555".to_string(),
            identity_seed: None,
            receive_timeout_ms: 1_000,
            heartbeat_interval_ms: 5_000,
            reconnect_backoff_base_ms: 100,
            reconnect_backoff_ceiling_ms: 10_000,
            initial_connect_attempts: 10,
            send_timeout_ms: 5_000,
            execution_concurrency: 1,
            execution_deadline_ms: None,
            ledger_capacity: JobLedger::DEFAULT_CAPACITY,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_address = match self.broker_address.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        };
        if !valid_address {
            return Err(ConfigError::InvalidAddress(self.broker_address.clone()));
        }

        if let Some(seed) = &self.identity_seed {
            if seed.is_empty() || seed.len() > MAX_IDENTITY_LEN {
                return Err(ConfigError::Invalid(format!(
                    "identity_seed must be 1-{} bytes",
                    MAX_IDENTITY_LEN
                )));
            }
        }

        if self.execution_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "execution_concurrency must be at least 1".to_string(),
            ));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid("receive_timeout_ms must be positive".to_string()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid("send_timeout_ms must be positive".to_string()));
        }
        if self.reconnect_backoff_ceiling_ms < self.reconnect_backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect_backoff_ceiling_ms ({}) is below reconnect_backoff_base_ms ({})",
                self.reconnect_backoff_ceiling_ms, self.reconnect_backoff_base_ms
            )));
        }
        if self.initial_connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "initial_connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.execution_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "execution_deadline_ms must be positive when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Identity presented to the broker. Stable for the lifetime of a
    /// session; with `identity_seed` set it is also stable across restarts.
    pub fn identity(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(seed) = &self.identity_seed {
            return seed.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn execution_deadline(&self) -> Option<Duration> {
        self.execution_deadline_ms.map(Duration::from_millis)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.reconnect_backoff_base_ms),
            Duration::from_millis(self.reconnect_backoff_ceiling_ms),
        )
    }
}
