//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! configuration handling, and connect error classification.

use crate::config::{MqttSection, ReconnectSection};
use crate::transport::{ClientIdentity, ConnectError, Credentials};
use rumqttc::v5::{ConnectionError, MqttOptions};
use std::time::Duration;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No usable connection, with the reason the last one ended
    Disconnected(String),
    /// Handshake in progress
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected("Not yet connected".to_string())
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Custom backoff pattern in milliseconds, used for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted; retries never stop
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: Vec::new(),
            sustained_delay: 2000, // fixed 2 s between attempts
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            backoff_pattern: section.backoff_pattern_ms.clone(),
            sustained_delay: section.delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay after the given failed attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.calculate_backoff_delay(attempt))
    }
}

/// Resolved broker address plus the timing knobs of one connection
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub pump_window: Duration,
}

/// Host name in the broker URL that stands for the network gateway
pub const GATEWAY_HOST: &str = "gateway";

impl BrokerEndpoint {
    /// Build the endpoint from config. `gateway` is substituted when the URL
    /// host is the literal `gateway`.
    pub fn from_config(config: &MqttSection, gateway: Option<&str>) -> Result<Self, ConnectError> {
        let (host, port) = parse_broker_url(&config.broker_url)?;
        let host = match (host.as_str(), gateway) {
            (GATEWAY_HOST, Some(gateway)) => gateway.to_string(),
            (GATEWAY_HOST, None) => {
                return Err(ConnectError::NetworkUnreachable(
                    "broker host is 'gateway' but no gateway address is known".to_string(),
                ))
            }
            _ => host,
        };

        Ok(Self {
            host,
            port,
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            pump_window: Duration::from_millis(config.pump_window_ms),
        })
    }
}

/// Split a broker URL into host and port, defaulting to 1883
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16), ConnectError> {
    let url = Url::parse(broker_url)
        .map_err(|_| ConnectError::Protocol(format!("Invalid broker URL: {broker_url}")))?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConnectError::Protocol(format!("Invalid broker URL: {broker_url}")))?;
    let port = url.port().unwrap_or(1883);

    Ok((host.to_string(), port))
}

/// Pure function to configure MQTT options for one connect attempt
pub fn configure_mqtt_options(
    identity: &ClientIdentity,
    credentials: Option<&Credentials>,
    endpoint: &BrokerEndpoint,
) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(identity.as_str(), endpoint.host.as_str(), endpoint.port);

    if let Some(credentials) = credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(endpoint.keep_alive);
    // Every attempt is a new identity, so there is no session worth resuming
    mqtt_options.set_clean_start(true);

    mqtt_options
}

/// Map an event loop failure during the handshake onto the connect taxonomy
pub fn classify_connection_error(error: &ConnectionError) -> ConnectError {
    match error {
        ConnectionError::Io(e) => ConnectError::NetworkUnreachable(e.to_string()),
        ConnectionError::ConnectionRefused(code) => ConnectError::Rejected(format!("{code:?}")),
        other => ConnectError::Protocol(other.to_string()),
    }
}
