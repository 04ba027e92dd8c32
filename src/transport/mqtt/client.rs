//! Impure I/O operations for MQTT client
//!
//! This module handles all impure I/O operations including network communication
//! and integration with the rumqttc client. The event loop is driven from the
//! caller's task through `pump`, so no background task owns the connection.

use super::connection::{
    classify_connection_error, configure_mqtt_options, BrokerEndpoint, ConnectionState,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::observability::mqtt_span;
use crate::transport::{
    BrokerConnection, ClientIdentity, ConnectError, Connected, Credentials, InboundMessage,
    PublishError, QoS, SubscribeError,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tracing::{debug, info, trace, warn, Instrument};

/// Request channel capacity between `AsyncClient` and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Upper bound on events handled by one pump so a busy link cannot stall the loop
const MAX_EVENTS_PER_PUMP: usize = 64;

/// Time given to the event loop to flush DISCONNECT on shutdown
const DISCONNECT_FLUSH: Duration = Duration::from_millis(100);

impl From<QoS> for MqttQoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => MqttQoS::AtMostOnce,
            QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        }
    }
}

/// MQTT broker connection for the tag bridge
pub struct MqttClient {
    config: MqttSection,
    gateway: Option<String>,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    state: ConnectionState,
    subscriptions: Vec<String>,
}

impl MqttClient {
    pub fn new(config: MqttSection) -> Self {
        Self {
            config,
            gateway: None,
            client: None,
            event_loop: None,
            state: ConnectionState::default(),
            subscriptions: Vec::new(),
        }
    }

    /// Address substituted for the `gateway` broker host
    pub fn with_gateway(mut self, gateway: Option<String>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Topics subscribed on the current session
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Apply a connection event and log the transition
    fn transition(&mut self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(&self.state, event);
        HealthMonitor::log_state_transition(&self.state, &next);
        self.state = next;
    }

    /// Forget the current session after link loss
    fn drop_session(&mut self, reason: ConnectionEvent) {
        self.client = None;
        self.event_loop = None;
        self.subscriptions.clear();
        self.transition(reason);
    }

    /// Poll a fresh event loop until the broker acknowledges the connection
    async fn wait_for_connack(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        let handshake = async {
            loop {
                match event_loop.poll().await {
                    Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => return Ok(()),
                        EventRoute::Disconnected => {
                            return Err(ConnectError::Rejected(
                                "Broker sent DISCONNECT during handshake".to_string(),
                            ))
                        }
                        _ => continue,
                    },
                    Err(e) => return Err(classify_connection_error(&e)),
                }
            }
        };

        match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(timeout.as_secs())),
        }
    }

    fn ensure_connected(&self) -> Result<&AsyncClient, ConnectionState> {
        match &self.client {
            Some(client) if HealthMonitor::can_publish(&self.state) => Ok(client),
            _ => Err(self.state.clone()),
        }
    }
}

#[async_trait]
impl BrokerConnection for MqttClient {
    async fn connect(
        &mut self,
        identity: &ClientIdentity,
        credentials: Option<&Credentials>,
    ) -> Result<Connected, ConnectError> {
        // A new attempt always starts from a clean session
        self.client = None;
        self.event_loop = None;
        self.subscriptions.clear();
        self.transition(ConnectionEvent::AttemptStarted);

        let endpoint = match BrokerEndpoint::from_config(&self.config, self.gateway.as_deref()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.transition(ConnectionEvent::NetworkError(e.to_string()));
                return Err(e);
            }
        };

        info!(
            client_id = %identity,
            host = %endpoint.host,
            port = endpoint.port,
            "Connecting to MQTT broker"
        );

        let mqtt_options = configure_mqtt_options(identity, credentials, &endpoint);
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let handshake = Self::wait_for_connack(&mut event_loop, endpoint.connect_timeout)
            .instrument(mqtt_span!(client_id = %identity, host = %endpoint.host));
        match handshake.await {
            Ok(()) => {
                self.client = Some(client);
                self.event_loop = Some(event_loop);
                self.transition(ConnectionEvent::ConnAckReceived);
                Ok(Connected {
                    client_id: identity.to_string(),
                })
            }
            Err(e) => {
                self.transition(ConnectionEvent::NetworkError(e.to_string()));
                Err(e)
            }
        }
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.clone()
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<(), PublishError> {
        let client = self
            .ensure_connected()
            .map_err(|state| PublishError::NotConnected { state })?;

        client
            .try_publish(topic, qos.into(), false, Bytes::copy_from_slice(payload))
            .map_err(|e| PublishError::Failed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        debug!(target: "mqtt_transport", "Queued {} bytes for {}", payload.len(), topic);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), SubscribeError> {
        let client = self
            .ensure_connected()
            .map_err(|state| SubscribeError::NotConnected { state })?;

        client
            .try_subscribe(topic, qos.into())
            .map_err(|e| SubscribeError::Failed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        if !self.subscriptions.iter().any(|s| s == topic) {
            self.subscriptions.push(topic.to_string());
        }
        info!("Subscribed to: {}", topic);
        Ok(())
    }

    async fn pump(&mut self) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let window = Duration::from_millis(self.config.pump_window_ms);

        if self.event_loop.is_none() {
            // No session: pace the loop as an idle poll would
            tokio::time::sleep(window).await;
            return inbound;
        }

        for _ in 0..MAX_EVENTS_PER_PUMP {
            let Some(event_loop) = self.event_loop.as_mut() else {
                break;
            };

            let event = match tokio::time::timeout(window, event_loop.poll()).await {
                Err(_) => break, // idle
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    warn!(target: "mqtt_transport", "MQTT event loop error: {}", e);
                    self.drop_session(ConnectionEvent::NetworkError(e.to_string()));
                    break;
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::MessageReceived { topic, payload } => {
                    if MessageHandler::is_subscribed_topic(&topic, &self.subscriptions) {
                        inbound.push(InboundMessage { topic, payload });
                    } else {
                        debug!(target: "mqtt_transport", "Ignoring message on {}", topic);
                    }
                }
                EventRoute::Disconnected => {
                    self.drop_session(ConnectionEvent::DisconnectedByBroker);
                    break;
                }
                EventRoute::SubscriptionConfirmed { packet_id, codes } => {
                    debug!(target: "mqtt_transport", "Subscription {} confirmed: {}", packet_id, codes);
                }
                EventRoute::InfrastructureEvent(event) => {
                    trace!(target: "mqtt_transport", "MQTT event: {}", event);
                }
                EventRoute::ConnectionAcknowledged | EventRoute::OutgoingEvent => {}
            }
        }

        inbound
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                warn!("Failed to queue MQTT disconnect: {}", e);
            }
            if let Some(mut event_loop) = self.event_loop.take() {
                // Give the DISCONNECT packet a chance to reach the broker
                let _ = tokio::time::timeout(DISCONNECT_FLUSH, async {
                    while event_loop.poll().await.is_ok() {}
                })
                .await;
            }
        }
        self.event_loop = None;
        self.subscriptions.clear();
        if !matches!(self.state, ConnectionState::Disconnected(_)) {
            self.transition(ConnectionEvent::ClosedLocally);
        }
        info!("MQTT client disconnected");
    }
}
