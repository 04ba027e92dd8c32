//! Top-level error type for the tag bridge
//!
//! Layer errors convert into `BridgeError`. Inside the control loop nothing
//! is fatal; every error is classified so it can be logged at the right
//! level and the loop can carry on.

use crate::config::ConfigError;
use crate::network::NetworkError;
use crate::tag::TagError;
use crate::transport::{ConnectError, PublishError, SubscribeError};
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("Tag operation failed: {0}")]
    Tag(#[from] TagError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the control loop treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried silently on the next iteration
    Transient,
    /// Reported, then the loop continues
    OperationFailed,
    /// Drives the connection to Disconnected and triggers a reconnect
    ConnectionLost,
    /// Only possible before the loop starts
    Startup,
}

impl BridgeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::Config(_) | BridgeError::Io(_) => ErrorClass::Startup,
            BridgeError::Network(NetworkError::Interrupted) => ErrorClass::Startup,
            BridgeError::Network(_) => ErrorClass::Transient,
            BridgeError::Connect(_) => ErrorClass::ConnectionLost,
            BridgeError::Publish(PublishError::NotConnected { .. })
            | BridgeError::Subscribe(SubscribeError::NotConnected { .. }) => {
                ErrorClass::ConnectionLost
            }
            BridgeError::Publish(_) | BridgeError::Subscribe(_) | BridgeError::Tag(_) => {
                ErrorClass::OperationFailed
            }
        }
    }

    /// Symbolic vendor status for tag errors, for structured log fields
    pub fn vendor_status(&self) -> Option<&'static str> {
        match self {
            BridgeError::Tag(e) => e.status().map(|s| s.name()),
            _ => None,
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
