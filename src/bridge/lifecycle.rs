//! Bridge control loop
//!
//! One task owns the `Bridge` and runs iterations back to back. Each
//! iteration, in order:
//!
//! 1. make sure the broker connection is up (blocking or one background step)
//! 2. pump the connection and route inbound display messages
//! 3. tick the heartbeat and publish it if due
//! 4. poll the tag pipeline and publish the payload if the gate lets it through

use super::gate::PublishGate;
use super::heartbeat::HeartbeatScheduler;
use crate::config::{BridgeConfig, ReconnectMode};
use crate::error::{BridgeError, BridgeResult, ErrorClass};
use crate::observability::{bridge_span, BridgeMetrics};
use crate::protocol::display::{DisplayMessage, DisplaySink};
use crate::protocol::payload::Payload;
use crate::protocol::topics::TopicBuilder;
use crate::tag::pipeline::TagReadPipeline;
use crate::tag::transceiver::TagTransceiver;
use crate::transport::mqtt::{ReconnectConfig, ReconnectionDecision, Reconnector};
use crate::transport::{BrokerConnection, ClientIdentity, Connected, Credentials, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Completed,
    /// Shutdown was requested while the loop was waiting
    Interrupted,
}

/// Settings the loop needs from the config, resolved once at startup
#[derive(Debug, Clone)]
struct LoopSettings {
    cabin_id: u32,
    mode: ReconnectMode,
    client_id_prefix: String,
    credentials: Option<Credentials>,
    heartbeat_message: String,
    publish_qos: QoS,
    subscribe_display: bool,
}

pub struct Bridge<B: BrokerConnection, T: TagTransceiver> {
    broker: B,
    pipeline: TagReadPipeline<T>,
    gate: PublishGate,
    heartbeat: HeartbeatScheduler,
    reconnector: Reconnector,
    metrics: BridgeMetrics,
    display: Box<dyn DisplaySink>,
    topics: TopicBuilder,
    settings: LoopSettings,
    pending: Option<Payload>,
    was_connected: bool,
    iteration: u64,
}

impl<B: BrokerConnection, T: TagTransceiver> Bridge<B, T> {
    /// Assemble a bridge; the heartbeat period starts now
    pub fn new(
        config: &BridgeConfig,
        broker: B,
        reader: T,
        display: Box<dyn DisplaySink>,
    ) -> BridgeResult<Self> {
        let pipeline = TagReadPipeline::new(
            reader,
            config.tag.block,
            config.station.cabin_id,
            config.tag.text_policy,
        )?;

        Ok(Self {
            broker,
            pipeline,
            gate: PublishGate::new(config.publish_cooldown()),
            heartbeat: HeartbeatScheduler::new(config.heartbeat_interval(), Instant::now()),
            reconnector: Reconnector::new(ReconnectConfig::from(&config.reconnect)),
            metrics: BridgeMetrics::new(),
            display,
            topics: TopicBuilder::new(&config.topics, config.station.cabin_id),
            settings: LoopSettings {
                cabin_id: config.station.cabin_id,
                mode: config.reconnect.mode,
                client_id_prefix: config.mqtt.client_id_prefix.clone(),
                credentials: config.get_mqtt_credentials(),
                heartbeat_message: config.heartbeat.message.clone(),
                publish_qos: config.publish.qos,
                subscribe_display: config.station.subscribe_display,
            },
            pending: None,
            was_connected: false,
            iteration: 0,
        })
    }

    /// Run until shutdown is signalled, then close the broker connection
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> BridgeResult<()> {
        info!(
            cabin_id = self.settings.cabin_id,
            display_topic = %self.topics.display(),
            mode = ?self.settings.mode,
            "Bridge loop starting"
        );

        while !*shutdown.borrow() {
            self.iteration += 1;
            let span = bridge_span!(iteration = self.iteration);
            if self.run_iteration(&mut shutdown).instrument(span).await == Iteration::Interrupted {
                break;
            }
            // Keep the loop cooperative when nothing in the iteration awaited
            tokio::task::yield_now().await;
        }

        info!("Bridge loop stopping");
        self.broker.disconnect().await;
        self.was_connected = false;
        info!(metrics = %self.metrics.snapshot().to_json(), "Final bridge metrics");
        Ok(())
    }

    /// One pass of the control loop
    pub async fn run_iteration(&mut self, shutdown: &mut watch::Receiver<bool>) -> Iteration {
        self.note_link_state();

        match self.settings.mode {
            ReconnectMode::Blocking => {
                if !self.ensure_connected(shutdown).await {
                    return Iteration::Interrupted;
                }
            }
            ReconnectMode::Background => self.connect_step().await,
        }

        self.pump().await;
        self.tick_heartbeat().await;
        self.poll_tag().await;
        Iteration::Completed
    }

    /// Retry until connected; returns false if shutdown interrupted the wait
    pub async fn ensure_connected(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        while !self.broker.is_connected() {
            if *shutdown.borrow() {
                return false;
            }
            if let Err(delay) = self.attempt_connect().await {
                if !interruptible_sleep(shutdown, delay).await {
                    info!("Shutdown requested during reconnect delay");
                    return false;
                }
            }
        }
        true
    }

    /// At most one connect attempt, only when the backoff timer allows it
    pub async fn connect_step(&mut self) {
        if self.broker.is_connected() {
            return;
        }
        match self.reconnector.decide(Instant::now()) {
            ReconnectionDecision::Wait { remaining } => {
                debug!(?remaining, "Reconnect backoff running");
            }
            ReconnectionDecision::Proceed { .. } => {
                let _ = self.attempt_connect().await;
            }
        }
    }

    /// One handshake with a fresh identity. On failure returns the backoff delay.
    async fn attempt_connect(&mut self) -> Result<(), Duration> {
        let identity = ClientIdentity::generate(&self.settings.client_id_prefix);
        self.metrics.connection_attempt();

        match self
            .broker
            .connect(&identity, self.settings.credentials.as_ref())
            .await
        {
            Ok(connected) => {
                self.on_connected(connected).await;
                Ok(())
            }
            Err(e) => {
                self.metrics.connection_failed();
                let delay = self.reconnector.record_failure(Instant::now());
                warn!(
                    attempt = self.reconnector.failed_attempts(),
                    client_id = %identity,
                    retry_in_ms = delay.as_millis() as u64,
                    "Broker connect failed: {}",
                    e
                );
                Err(delay)
            }
        }
    }

    async fn on_connected(&mut self, connected: Connected) {
        let attempts = self.reconnector.record_success();
        self.metrics.connection_established();
        self.was_connected = true;
        info!(client_id = %connected.client_id, attempts, "Connected to broker");

        if self.settings.subscribe_display {
            let topic = self.topics.display().to_string();
            if let Err(e) = self.broker.subscribe(&topic, QoS::AtLeastOnce).await {
                self.report(e.into());
            }
        }

        if let Some(payload) = self.pending.take() {
            info!(payload = %payload, "Publishing payload held while disconnected");
            self.publish_payload(&payload).await;
        }
    }

    /// Log a Connected -> Disconnected change seen since the last check
    fn note_link_state(&mut self) {
        let connected = self.broker.is_connected();
        if self.was_connected && !connected {
            self.metrics.connection_lost();
            warn!(state = ?self.broker.connection_state(), "Broker connection lost");
        }
        self.was_connected = connected;
    }

    async fn pump(&mut self) {
        let inbound = self.broker.pump().await;
        self.note_link_state();

        for message in inbound {
            self.metrics.message_received();
            if message.topic == self.topics.display() {
                let display = DisplayMessage::parse(&message.payload);
                self.display.show(&display);
            } else {
                debug!(topic = %message.topic, "Ignoring inbound message");
            }
        }
    }

    async fn tick_heartbeat(&mut self) {
        // The period keeps running while disconnected; a due heartbeat goes
        // out once the link is back
        if !self.broker.is_connected() {
            return;
        }
        let Some(event) = self.heartbeat.tick(Instant::now()) else {
            return;
        };

        let topic = self.topics.heartbeat().to_string();
        let body = self.settings.heartbeat_message.clone();
        match self
            .broker
            .publish(&topic, body.as_bytes(), QoS::AtMostOnce)
            .await
        {
            Ok(()) => {
                self.metrics.heartbeat_sent();
                info!(
                    since_last_secs = event.since_last.as_secs(),
                    metrics = %self.metrics.snapshot().to_json(),
                    "Heartbeat sent"
                );
            }
            Err(e) => {
                self.metrics.publish_failed();
                self.report(e.into());
            }
        }
    }

    async fn poll_tag(&mut self) {
        let Some(result) = self.pipeline.poll() else {
            return;
        };

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.tag_failed();
                self.report(e.into());
                return;
            }
        };
        self.metrics.tag_read();

        let now = Instant::now();
        if !self.gate.should_publish(&payload, now) {
            self.metrics.payload_suppressed();
            debug!(payload = %payload, "Repeat within cooldown suppressed");
            return;
        }

        if self.broker.is_connected() {
            self.publish_payload(&payload).await;
        } else {
            info!(payload = %payload, "Broker unavailable; holding latest payload");
            self.metrics.payload_deferred();
            self.pending = Some(payload.clone());
        }
        self.gate.record(payload, now);
    }

    async fn publish_payload(&mut self, payload: &Payload) {
        let topic = self.topics.tag_events().to_string();
        match self
            .broker
            .publish(&topic, payload.as_bytes(), self.settings.publish_qos)
            .await
        {
            Ok(()) => {
                self.metrics.payload_published();
                info!(topic = %topic, payload = %payload, "Tag payload published");
            }
            Err(e) => {
                self.metrics.publish_failed();
                self.report(e.into());
            }
        }
    }

    /// Log an in-loop error at the level its class calls for
    fn report(&self, error: BridgeError) {
        match error.class() {
            ErrorClass::Transient => debug!("{}", error),
            ErrorClass::ConnectionLost => info!("{}", error),
            ErrorClass::OperationFailed | ErrorClass::Startup => match error.vendor_status() {
                Some(status) => warn!(status, "{}", error),
                None => warn!("{}", error),
            },
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn reader(&self) -> &T {
        self.pipeline.reader()
    }

    pub fn reader_mut(&mut self) -> &mut T {
        self.pipeline.reader_mut()
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Payload held for publication once the broker is back
    pub fn pending(&self) -> Option<&Payload> {
        self.pending.as_ref()
    }
}

/// Sleep for `delay` unless shutdown is requested first
///
/// Returns true if the sleep completed, false if shutdown was requested.
pub async fn interruptible_sleep(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender gone; nobody can ask for shutdown any more
                    tokio::time::sleep_until(deadline).await;
                    return true;
                }
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}
