use thiserror::Error;

/// Fatal startup errors. This is the only error that crosses the runtime
/// entry point; everything after registration is absorbed by the session.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid broker address '{0}': expected host:port")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Broker at {address} unreachable after {attempts} attempts: {last_error}")]
    BrokerUnreachable {
        address: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to start async runtime: {0}")]
    Runtime(String),
}

/// Channel faults reported by a [`crate::transport::Transport`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to resolve {address}: {reason}")]
    Resolve { address: String, reason: String },

    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The channel is gone and must be re-established
    #[error("Connection broken: {0}")]
    Broken(String),

    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Whether the failure happened while establishing the channel
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            TransportError::Resolve { .. } | TransportError::Connect { .. }
        )
    }
}
