//! MQTT implementation of the broker connection
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Connection state, options and endpoint resolution
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`health_monitor`] - State transitions and the reconnect backoff timer
//! - [`client`] - Impure I/O against the broker
//!
//! # Usage
//!
//! ```rust,no_run
//! use tagbridge::config::BridgeConfig;
//! use tagbridge::transport::mqtt::MqttClient;
//! use tagbridge::transport::{BrokerConnection, ClientIdentity, QoS};
//!
//! # tokio_test::block_on(async {
//! let config = BridgeConfig::from_toml_str(
//!     "[station]\ncabin_id = 2\n[mqtt]\nbroker_url = \"mqtt://localhost:1883\"\n",
//! )?;
//!
//! let mut client = MqttClient::new(config.mqtt.clone());
//! client.connect(&ClientIdentity::generate("tagbridge"), None).await?;
//! client.publish("system/heartbeat", b"System OK", QoS::AtMostOnce).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{BrokerEndpoint, ConnectionState, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision, Reconnector};
pub use message_handler::{EventRoute, MessageHandler};
