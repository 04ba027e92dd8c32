//! Transport layer between the bridge and the message broker
//!
//! This module provides the broker connection abstraction and the MQTT
//! implementation used in production.

use crate::transport::mqtt::ConnectionState;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod mqtt;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            other => Err(format!("unsupported QoS level {other} (expected 0 or 1)")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

/// Broker login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Client identifier presented to the broker for one connect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Fresh identity `{prefix}-{xxxx}` with a random 16-bit hex suffix so a
    /// reconnecting client never collides with its own stale session
    pub fn generate(prefix: &str) -> Self {
        let suffix = (uuid::Uuid::new_v4().as_u128() & 0xFFFF) as u16;
        Self(format!("{prefix}-{suffix:04x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of a completed handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub client_id: String,
}

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Why a single connect attempt failed
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("Connection rejected by broker: {0}")]
    Rejected(String),
    #[error("Timed out waiting for CONNACK after {0} s")]
    Timeout(u64),
    #[error("Protocol error during connect: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Publishing to {topic} failed")]
    Failed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Subscribing to {topic} failed")]
    Failed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A single logical connection to the message broker
///
/// Implementations own their `ConnectionState`. Only `connect` moves toward
/// `Connected`; only `pump` (link loss) or `disconnect` moves away from it.
#[async_trait::async_trait]
pub trait BrokerConnection: Send {
    /// Attempt one handshake with a fresh identity
    async fn connect(
        &mut self,
        identity: &ClientIdentity,
        credentials: Option<&Credentials>,
    ) -> Result<Connected, ConnectError>;

    /// Check if the connection is currently up
    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }

    fn connection_state(&self) -> ConnectionState;

    /// Best-effort send; nothing is queued for later if this fails
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS)
        -> Result<(), PublishError>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), SubscribeError>;

    /// Service inbound traffic and detect link loss; must run every iteration
    async fn pump(&mut self) -> Vec<InboundMessage>;

    /// Close the connection if open
    async fn disconnect(&mut self);
}

/// Type alias for the production transport
pub type MqttTransport = mqtt::MqttClient;
