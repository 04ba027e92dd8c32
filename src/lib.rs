//! tagbridge
//!
//! Reads identifiers from contactless (MIFARE Classic) tags at a fitting-room
//! cabin and republishes them to an MQTT broker, one event per read.
//!
//! # Overview
//!
//! - `tag`: reader sessions, the read pipeline and the provisioning writer
//! - `protocol`: the published payload, topic names and display records
//! - `transport`: the broker connection abstraction and its MQTT implementation
//! - `bridge`: the control loop tying reader and broker together
//! - `network`: waiting for the IP link and finding the gateway
//!
//! # Quick Start
//!
//! ```rust
//! use tagbridge::protocol::{Payload, TextPolicy};
//! use tagbridge::tag::BlockData;
//!
//! let block = BlockData::from_text("MERT2025GMLK9999").unwrap();
//! let payload = Payload::from_block(&block, 2, TextPolicy::Raw);
//! assert_eq!(payload.to_string(), "MERT2025GMLK9999 Cabin 2");
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod network;
pub mod observability;
pub mod protocol;
pub mod tag;
pub mod testing;
pub mod transport;

pub use bridge::{Bridge, Iteration};
pub use config::{BridgeConfig, ConfigError, ReconnectMode};
pub use error::{BridgeError, BridgeResult, ErrorClass};
pub use protocol::{DisplayMessage, DisplaySink, Payload, TextPolicy};
pub use transport::mqtt::MqttClient;
pub use transport::BrokerConnection;
