//! Operational counters for the bridge loop
//!
//! The bridge owns its `BridgeMetrics`; there is no global collector. A
//! serializable snapshot is logged on every heartbeat and at shutdown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Counters updated by the bridge as it runs
#[derive(Debug, Clone)]
pub struct BridgeMetrics {
    started: Instant,

    // Tag side
    tags_read: u64,
    tag_errors: u64,
    payloads_published: u64,
    payloads_suppressed: u64,
    payloads_deferred: u64,

    // Broker side
    connected: bool,
    connection_attempts: u64,
    connections_established: u64,
    connection_failures: u64,
    connections_lost: u64,
    publish_failures: u64,
    heartbeats_sent: u64,
    messages_received: u64,
    last_publish: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            tags_read: 0,
            tag_errors: 0,
            payloads_published: 0,
            payloads_suppressed: 0,
            payloads_deferred: 0,
            connected: false,
            connection_attempts: 0,
            connections_established: 0,
            connection_failures: 0,
            connections_lost: 0,
            publish_failures: 0,
            heartbeats_sent: 0,
            messages_received: 0,
            last_publish: None,
            last_heartbeat: None,
        }
    }

    // Tag metrics
    pub fn tag_read(&mut self) {
        self.tags_read += 1;
    }

    pub fn tag_failed(&mut self) {
        self.tag_errors += 1;
    }

    pub fn payload_published(&mut self) {
        self.payloads_published += 1;
        self.last_publish = Some(Utc::now());
    }

    pub fn payload_suppressed(&mut self) {
        self.payloads_suppressed += 1;
    }

    pub fn payload_deferred(&mut self) {
        self.payloads_deferred += 1;
    }

    // MQTT metrics
    pub fn connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    pub fn connection_established(&mut self) {
        self.connections_established += 1;
        self.connected = true;
    }

    pub fn connection_failed(&mut self) {
        self.connection_failures += 1;
        self.connected = false;
    }

    pub fn connection_lost(&mut self) {
        self.connections_lost += 1;
        self.connected = false;
    }

    pub fn publish_failed(&mut self) {
        self.publish_failures += 1;
    }

    pub fn heartbeat_sent(&mut self) {
        self.heartbeats_sent += 1;
        self.last_heartbeat = Some(Utc::now());
    }

    pub fn message_received(&mut self) {
        self.messages_received += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tags: TagMetrics {
                tags_read: self.tags_read,
                tag_errors: self.tag_errors,
                payloads_published: self.payloads_published,
                payloads_suppressed: self.payloads_suppressed,
                payloads_deferred: self.payloads_deferred,
            },
            mqtt: MqttMetrics {
                connected: self.connected,
                connection_attempts: self.connection_attempts,
                connections_established: self.connections_established,
                connection_failures: self.connection_failures,
                connections_lost: self.connections_lost,
                publish_failures: self.publish_failures,
                heartbeats_sent: self.heartbeats_sent,
                messages_received: self.messages_received,
                last_publish: self.last_publish,
                last_heartbeat: self.last_heartbeat,
            },
            uptime_seconds: self.started.elapsed().as_secs(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tags: TagMetrics,
    pub mqtt: MqttMetrics,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagMetrics {
    pub tags_read: u64,
    pub tag_errors: u64,
    pub payloads_published: u64,
    pub payloads_suppressed: u64,
    pub payloads_deferred: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub publish_failures: u64,
    pub heartbeats_sent: u64,
    pub messages_received: u64,
    pub last_publish: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// One-line JSON rendering for log output
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
