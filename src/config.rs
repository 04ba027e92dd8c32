//! Deploy-time configuration for the tag bridge
//!
//! Everything is fixed when the process starts; nothing here is reconfigurable
//! at runtime. Defaults reproduce the reader firmware constants so a file only
//! needs `[station]` and `[mqtt]`.

use crate::protocol::payload::TextPolicy;
use crate::tag::transceiver::is_sector_trailer;
use crate::transport::{Credentials, QoS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Longest client id prefix that still fits the 23 character MQTT 3.1.1
/// client identifier once the `-xxxx` suffix is appended
pub const MAX_CLIENT_ID_PREFIX: usize = 18;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub station: StationSection,
    #[serde(default)]
    pub network: NetworkSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub tag: TagSection,
    #[serde(default)]
    pub writer: WriterSection,
}

/// Station section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationSection {
    /// Cabin identifier appended to every tag payload
    pub cabin_id: u32,
    /// Subscribe to the cabin display topic after each connect
    #[serde(default = "default_true")]
    pub subscribe_display: bool,
}

/// Network link section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Access point name handed to the network link
    pub ssid: Option<String>,
    /// Environment variable containing the access point password
    pub password_env: Option<String>,
    /// Poll period while waiting for the link to come up
    #[serde(default = "default_link_poll_ms")]
    pub link_poll_ms: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            ssid: None,
            password_env: None,
            link_poll_ms: default_link_poll_ms(),
        }
    }
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL; the host `gateway` means the network link's gateway address
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive negotiated with the broker (default: 30)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Client id prefix; each attempt appends a random 4 hex digit suffix
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Time allowed for the CONNECT/CONNACK handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How long one pump waits for inbound traffic when the link is idle
    #[serde(default = "default_pump_window_ms")]
    pub pump_window_ms: u64,
}

/// Topic names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    #[serde(default = "default_tag_events_topic")]
    pub tag_events: String,
    #[serde(default = "default_heartbeat_topic")]
    pub heartbeat: String,
    /// Display topic is `{display_prefix}.cabin{cabin_id}`
    #[serde(default = "default_display_prefix")]
    pub display_prefix: String,
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            tag_events: default_tag_events_topic(),
            heartbeat: default_heartbeat_topic(),
            display_prefix: default_display_prefix(),
        }
    }
}

/// Heartbeat section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSection {
    /// Heartbeat interval in seconds (default: 600 = 10 minutes)
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_heartbeat_message")]
    pub message: String,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            message: default_heartbeat_message(),
        }
    }
}

/// Publish gating section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// Minimum time before an unchanged payload is sent again
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub qos: QoS,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            qos: QoS::default(),
        }
    }
}

/// What the loop does while the broker is unreachable
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectMode {
    /// Retry until connected; no tag reads or heartbeats meanwhile
    #[default]
    Blocking,
    /// One connect attempt per iteration when the backoff allows; tag reads continue
    Background,
}

/// Reconnection section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default)]
    pub mode: ReconnectMode,
    /// Delay between connect attempts (default: 2000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
    /// Optional escalating delays used before settling on `delay_ms`
    #[serde(default)]
    pub backoff_pattern_ms: Vec<u64>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            mode: ReconnectMode::default(),
            delay_ms: default_reconnect_delay_ms(),
            backoff_pattern_ms: Vec::new(),
        }
    }
}

/// Tag section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagSection {
    /// Data block holding the identifier (default: 4, first block of sector 1)
    #[serde(default = "default_block")]
    pub block: u8,
    #[serde(default)]
    pub text_policy: TextPolicy,
}

impl Default for TagSection {
    fn default() -> Self {
        Self {
            block: default_block(),
            text_policy: TextPolicy::default(),
        }
    }
}

/// Writer section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriterSection {
    /// Pause after each write so a tag left on the reader is not rewritten at once
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Read the block back after writing
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl Default for WriterSection {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            verify: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_link_poll_ms() -> u64 {
    500
}

fn default_keep_alive() -> u64 {
    30
}

fn default_client_id_prefix() -> String {
    "tagbridge".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_pump_window_ms() -> u64 {
    10
}

fn default_tag_events_topic() -> String {
    "test_queue".to_string()
}

fn default_heartbeat_topic() -> String {
    "system/heartbeat".to_string()
}

fn default_display_prefix() -> String {
    "target_queue".to_string()
}

fn default_heartbeat_interval() -> u64 {
    600 // 10 minutes
}

fn default_heartbeat_message() -> String {
    "System OK".to_string()
}

fn default_cooldown_ms() -> u64 {
    5000
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_block() -> u8 {
    4
}

fn default_settle_ms() -> u64 {
    2000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid client id prefix: {0}")]
    InvalidClientIdPrefix(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;
        validate_client_id_prefix(&self.mqtt.client_id_prefix)?;

        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        // Carried in a 16 bit field of the CONNECT packet
        if self.mqtt.keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be at most 65535".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "heartbeat.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.delay_ms must be greater than 0".to_string(),
            ));
        }
        if is_sector_trailer(self.tag.block) {
            return Err(ConfigError::InvalidConfig(format!(
                "tag.block {} is a sector trailer",
                self.tag.block
            )));
        }
        for (name, topic) in [
            ("topics.tag_events", &self.topics.tag_events),
            ("topics.heartbeat", &self.topics.heartbeat),
            ("topics.display_prefix", &self.topics.display_prefix),
        ] {
            crate::protocol::topics::validate_publish_topic(topic)
                .map_err(|e| ConfigError::InvalidConfig(format!("{name}: {e}")))?;
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Broker credentials, present only when the username variable is set
    pub fn get_mqtt_credentials(&self) -> Option<Credentials> {
        let username = Self::get_env_var_optional(self.mqtt.username_env.as_ref())?;
        let password =
            Self::get_env_var_optional(self.mqtt.password_env.as_ref()).unwrap_or_default();
        Some(Credentials { username, password })
    }

    /// Access point password; required once `password_env` is configured
    pub fn get_network_password(&self) -> Result<Option<String>, ConfigError> {
        self.network
            .password_env
            .as_deref()
            .map(Self::get_env_var_required)
            .transpose()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    pub fn publish_cooldown(&self) -> Duration {
        Duration::from_millis(self.publish.cooldown_ms)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[station]
cabin_id = 2

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate an `mqtt://host[:port]` broker URL
pub fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "mqtt" | "tcp") {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (only mqtt:// and tcp:// are supported)"
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
    }
    Ok(())
}

/// Validate client id prefix format: `[a-zA-Z0-9_-]{1,18}`
fn validate_client_id_prefix(prefix: &str) -> Result<(), ConfigError> {
    let valid_chars = prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if prefix.is_empty() || prefix.len() > MAX_CLIENT_ID_PREFIX || !valid_chars {
        return Err(ConfigError::InvalidClientIdPrefix(format!(
            "'{prefix}' must match [a-zA-Z0-9_-]{{1,{MAX_CLIENT_ID_PREFIX}}}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_firmware_defaults() {
        let config = BridgeConfig::test_config();
        assert_eq!(config.station.cabin_id, 2);
        assert!(config.station.subscribe_display);
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.topics.tag_events, "test_queue");
        assert_eq!(config.topics.heartbeat, "system/heartbeat");
        assert_eq!(config.heartbeat.interval_secs, 600);
        assert_eq!(config.heartbeat.message, "System OK");
        assert_eq!(config.publish.cooldown_ms, 5000);
        assert_eq!(config.publish.qos, QoS::AtMostOnce);
        assert_eq!(config.reconnect.mode, ReconnectMode::Blocking);
        assert_eq!(config.reconnect.delay_ms, 2000);
        assert_eq!(config.tag.block, 4);
        assert_eq!(config.tag.text_policy, TextPolicy::Raw);
        assert_eq!(config.writer.settle_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[station]
cabin_id = 1
subscribe_display = false

[network]
ssid = "Mert"
password_env = "TAGBRIDGE_WIFI_PASSWORD"

[mqtt]
broker_url = "mqtt://gateway:1883"
username_env = "TAGBRIDGE_MQTT_USER"
password_env = "TAGBRIDGE_MQTT_PASS"
keep_alive_secs = 60
client_id_prefix = "ESP32ClientID"

[publish]
cooldown_ms = 1500
qos = 1

[reconnect]
mode = "background"
delay_ms = 1000
backoff_pattern_ms = [100, 500]

[tag]
block = 8
text_policy = "trim"
"#;

        let config = BridgeConfig::from_toml_str(toml_content).unwrap();
        assert!(!config.station.subscribe_display);
        assert_eq!(config.network.ssid.as_deref(), Some("Mert"));
        assert_eq!(config.mqtt.client_id_prefix, "ESP32ClientID");
        assert_eq!(config.publish.qos, QoS::AtLeastOnce);
        assert_eq!(config.publish_cooldown(), Duration::from_millis(1500));
        assert_eq!(config.reconnect.mode, ReconnectMode::Background);
        assert_eq!(config.reconnect.backoff_pattern_ms, vec![100, 500]);
        assert_eq!(config.tag.block, 8);
        assert_eq!(config.tag.text_policy, TextPolicy::Trim);
    }

    #[test]
    fn test_sector_trailer_block_rejected() {
        let mut config = BridgeConfig::test_config();
        config.tag.block = 7;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(msg)) if msg.contains("sector trailer")
        ));
    }

    #[test]
    fn test_invalid_broker_urls() {
        assert!(validate_broker_url("mqtt://localhost:1883").is_ok());
        assert!(validate_broker_url("tcp://10.0.0.1").is_ok());
        assert!(validate_broker_url("not a url").is_err());
        assert!(validate_broker_url("mqtts://localhost:8883").is_err());
        assert!(validate_broker_url("http://localhost").is_err());
    }

    #[test]
    fn test_client_id_prefix_validation() {
        assert!(validate_client_id_prefix("ESP32ClientID").is_ok());
        assert!(validate_client_id_prefix("cabin_2-reader").is_ok());
        assert!(validate_client_id_prefix("").is_err());
        assert!(validate_client_id_prefix("has space").is_err());
        assert!(validate_client_id_prefix("a-very-long-client-prefix").is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut config = BridgeConfig::test_config();
        config.heartbeat.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::test_config();
        config.reconnect.delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::test_config();
        config.mqtt.keep_alive_secs = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let mut config = BridgeConfig::test_config();
        config.topics.tag_events = "tags/#".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_station_section_fails() {
        let result = BridgeConfig::from_toml_str(
            r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
        );
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }
}
