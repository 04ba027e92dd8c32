//! Pure health monitoring and reconnection logic for MQTT client
//!
//! This module contains pure functions for reconnection decision making
//! and connection state tracking. Time is always passed in so the logic can
//! run against a paused tokio clock in tests.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Pure health monitoring and state transition logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(
        _current_state: &ConnectionState,
        event: ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::AttemptStarted => ConnectionState::Connecting,
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::ClosedLocally => {
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    ///
    /// Lost links and failed attempts are reported at warn by the bridge,
    /// so the transport only traces them.
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                debug!("MQTT connection lost: {}", reason);
            }
            (ConnectionState::Connecting, ConnectionState::Disconnected(reason)) => {
                debug!("MQTT connect attempt failed: {}", reason);
            }
            (a, b) if a == b => {}
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Handshake started
    AttemptStarted,
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Network or protocol error
    NetworkError(String),
    /// Local side closed the session
    ClosedLocally,
}

/// Decision result for one pass of the reconnect step
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Make an attempt now
    Proceed { attempt: u32 },
    /// Backoff timer still running
    Wait { remaining: Duration },
}

/// Retry bookkeeping for the broker connection
///
/// Attempts are unbounded. After a failure the next attempt is allowed once
/// the backoff delay has passed; a success resets the count.
#[derive(Debug, Clone)]
pub struct Reconnector {
    config: ReconnectConfig,
    attempts: u32,
    next_attempt_at: Option<Instant>,
}

impl Reconnector {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            next_attempt_at: None,
        }
    }

    /// Whether an attempt may start at `now`
    pub fn decide(&self, now: Instant) -> ReconnectionDecision {
        match self.next_attempt_at {
            Some(at) if now < at => ReconnectionDecision::Wait {
                remaining: at - now,
            },
            _ => ReconnectionDecision::Proceed {
                attempt: self.attempts + 1,
            },
        }
    }

    /// Record a failed attempt and return the delay before the next one
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.attempts += 1;
        let delay = self.config.backoff_duration(self.attempts);
        self.next_attempt_at = Some(now + delay);
        delay
    }

    /// Record a successful attempt; returns how many attempts it took
    pub fn record_success(&mut self) -> u32 {
        let total = self.attempts + 1;
        self.attempts = 0;
        self.next_attempt_at = None;
        total
    }

    /// Failed attempts since the last success
    pub fn failed_attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LogCapture;
    use tracing::Level;

    fn fixed_delay(ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            backoff_pattern: Vec::new(),
            sustained_delay: ms,
        }
    }

    #[test]
    fn test_determine_next_state() {
        let state = HealthMonitor::determine_next_state(
            &ConnectionState::default(),
            ConnectionEvent::AttemptStarted,
        );
        assert_eq!(state, ConnectionState::Connecting);

        let state =
            HealthMonitor::determine_next_state(&state, ConnectionEvent::ConnAckReceived);
        assert_eq!(state, ConnectionState::Connected);

        let state = HealthMonitor::determine_next_state(
            &state,
            ConnectionEvent::NetworkError("reset by peer".to_string()),
        );
        assert_eq!(
            state,
            ConnectionState::Disconnected("reset by peer".to_string())
        );

        let state =
            HealthMonitor::determine_next_state(&state, ConnectionEvent::DisconnectedByBroker);
        assert!(matches!(state, ConnectionState::Disconnected(_)));
    }

    #[test]
    fn test_disconnect_transitions_stay_below_warn() {
        let (logs, _guard) = LogCapture::install();
        let lost = ConnectionState::Disconnected("reset by peer".to_string());

        HealthMonitor::log_state_transition(&ConnectionState::Connected, &lost);
        HealthMonitor::log_state_transition(&ConnectionState::Connecting, &lost);
        assert!(logs.warnings().is_empty());
        assert_eq!(
            logs.messages_at(Level::DEBUG),
            vec![
                "MQTT connection lost: reset by peer",
                "MQTT connect attempt failed: reset by peer"
            ]
        );

        HealthMonitor::log_state_transition(
            &ConnectionState::Connecting,
            &ConnectionState::Connected,
        );
        assert_eq!(
            logs.messages_at(Level::INFO),
            vec!["MQTT connection established"]
        );
    }

    #[test]
    fn test_can_publish() {
        assert!(HealthMonitor::can_publish(&ConnectionState::Connected));
        assert!(!HealthMonitor::can_publish(&ConnectionState::Connecting));
        assert!(!HealthMonitor::can_publish(&ConnectionState::Disconnected(
            "x".to_string()
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_immediate() {
        let reconnector = Reconnector::new(fixed_delay(2000));
        assert_eq!(
            reconnector.decide(Instant::now()),
            ReconnectionDecision::Proceed { attempt: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_arms_backoff_timer() {
        let mut reconnector = Reconnector::new(fixed_delay(2000));
        let start = Instant::now();

        let delay = reconnector.record_failure(start);
        assert_eq!(delay, Duration::from_millis(2000));
        assert_eq!(
            reconnector.decide(start + Duration::from_millis(500)),
            ReconnectionDecision::Wait {
                remaining: Duration::from_millis(1500)
            }
        );
        assert_eq!(
            reconnector.decide(start + Duration::from_millis(2000)),
            ReconnectionDecision::Proceed { attempt: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_attempts() {
        let mut reconnector = Reconnector::new(ReconnectConfig {
            backoff_pattern: vec![100, 200],
            sustained_delay: 1000,
        });
        let now = Instant::now();

        assert_eq!(reconnector.record_failure(now), Duration::from_millis(100));
        assert_eq!(reconnector.record_failure(now), Duration::from_millis(200));
        assert_eq!(reconnector.record_failure(now), Duration::from_millis(1000));
        assert_eq!(reconnector.failed_attempts(), 3);

        assert_eq!(reconnector.record_success(), 4);
        assert_eq!(reconnector.failed_attempts(), 0);
        assert_eq!(
            reconnector.decide(now),
            ReconnectionDecision::Proceed { attempt: 1 }
        );
        assert_eq!(reconnector.record_failure(now), Duration::from_millis(100));
    }
}
