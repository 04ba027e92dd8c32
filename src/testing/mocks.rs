//! Mock implementations for testing
//!
//! Provides a scripted tag transceiver, an in-memory broker, a recording
//! display and a network link with a scripted bring-up, so the bridge can be
//! exercised without reader hardware or a running broker.

use crate::network::{NetworkError, NetworkLink};
use crate::protocol::display::{DisplayMessage, DisplaySink};
use crate::tag::transceiver::{AuthKey, BlockData, StatusCode, TagTransceiver, Uid, BLOCK_SIZE};
use crate::transport::mqtt::ConnectionState;
use crate::transport::{
    BrokerConnection, ClientIdentity, ConnectError, Connected, Credentials, InboundMessage,
    PublishError, QoS, SubscribeError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Transceiver driven by a script instead of a radio
///
/// A tag set with `with_tag_text` or `present_tag` stays in the field (every
/// presence check succeeds) until `remove_tag`. Failures injected with the
/// `fail_*` builders apply to every call.
#[derive(Debug, Default)]
pub struct ScriptedTransceiver {
    tag: Option<HashMap<u8, BlockData>>,
    fail_begin: Option<StatusCode>,
    fail_auth: Option<StatusCode>,
    fail_read: Option<StatusCode>,
    fail_write: Option<StatusCode>,
    sessions_begun: u32,
    sessions_ended: u32,
    reads: u32,
    writes: u32,
    auth_blocks: Vec<u8>,
}

impl ScriptedTransceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a tag whose every data block holds `text` in the field
    pub fn with_tag_text(mut self, text: &str) -> Self {
        self.present_tag(text);
        self
    }

    pub fn fail_begin(mut self, status: StatusCode) -> Self {
        self.fail_begin = Some(status);
        self
    }

    pub fn fail_auth(mut self, status: StatusCode) -> Self {
        self.fail_auth = Some(status);
        self
    }

    pub fn fail_read(mut self, status: StatusCode) -> Self {
        self.fail_read = Some(status);
        self
    }

    pub fn fail_write(mut self, status: StatusCode) -> Self {
        self.fail_write = Some(status);
        self
    }

    /// Replace whatever is in the field with a tag holding `text`; bytes
    /// beyond one block are dropped
    pub fn present_tag(&mut self, text: &str) {
        let mut bytes = [0u8; BLOCK_SIZE];
        let len = text.len().min(BLOCK_SIZE);
        bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
        let data = BlockData::new(bytes);
        let blocks = (1..64u8).map(|block| (block, data)).collect();
        self.tag = Some(blocks);
    }

    pub fn remove_tag(&mut self) {
        self.tag = None;
    }

    pub fn sessions_begun(&self) -> u32 {
        self.sessions_begun
    }

    pub fn sessions_ended(&self) -> u32 {
        self.sessions_ended
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }

    pub fn writes(&self) -> u32 {
        self.writes
    }

    /// Blocks passed to `authenticate`, in call order
    pub fn auth_blocks(&self) -> &[u8] {
        &self.auth_blocks
    }
}

impl TagTransceiver for ScriptedTransceiver {
    fn presence_detected(&mut self) -> bool {
        self.tag.is_some()
    }

    fn begin_session(&mut self) -> Result<Uid, StatusCode> {
        if self.tag.is_none() {
            return Err(StatusCode::Timeout);
        }
        if let Some(status) = self.fail_begin {
            return Err(status);
        }
        self.sessions_begun += 1;
        Ok(Uid::single_size([0xDE, 0xAD, 0xBE, 0xEF]))
    }

    fn authenticate(&mut self, block: u8, _key: &AuthKey, _uid: &Uid) -> Result<(), StatusCode> {
        self.auth_blocks.push(block);
        match self.fail_auth {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn read_block(&mut self, block: u8) -> Result<BlockData, StatusCode> {
        if let Some(status) = self.fail_read {
            return Err(status);
        }
        self.reads += 1;
        self.tag
            .as_ref()
            .and_then(|blocks| blocks.get(&block).copied())
            .ok_or(StatusCode::Error)
    }

    fn write_block(&mut self, block: u8, data: &BlockData) -> Result<(), StatusCode> {
        if let Some(status) = self.fail_write {
            return Err(status);
        }
        let blocks = self.tag.as_mut().ok_or(StatusCode::Timeout)?;
        blocks.insert(block, *data);
        self.writes += 1;
        Ok(())
    }

    fn end_session(&mut self) {
        self.sessions_ended += 1;
    }
}

/// A publish seen by `MockBroker`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// In-memory broker connection
#[derive(Debug, Default)]
pub struct MockBroker {
    state: ConnectionState,
    refuse_next: u32,
    fail_publishes: bool,
    link_drop_pending: bool,
    connect_attempts: u32,
    disconnects: u32,
    identities: Vec<String>,
    credentials: Vec<Option<String>>,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<String>,
    inbound: VecDeque<InboundMessage>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that refuses the first `n` connect attempts
    pub fn failing_first(n: u32) -> Self {
        Self {
            refuse_next: n,
            ..Self::default()
        }
    }

    /// Refuse the next `n` connect attempts from now on
    pub fn refuse_next_connects(&mut self, n: u32) {
        self.refuse_next = n;
    }

    pub fn set_fail_publishes(&mut self, fail: bool) {
        self.fail_publishes = fail;
    }

    /// The link drops; the next `pump` notices it
    pub fn drop_link(&mut self) {
        self.link_drop_pending = true;
    }

    /// Queue a message for delivery on the next `pump`
    pub fn inject(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
        });
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects
    }

    /// Client ids presented, one per connect attempt
    pub fn identities(&self) -> &[String] {
        &self.identities
    }

    /// Usernames presented, one per connect attempt
    pub fn usernames(&self) -> &[Option<String>] {
        &self.credentials
    }

    pub fn published(&self) -> &[PublishedMessage] {
        &self.published
    }

    /// Publishes on one topic, payloads decoded lossily
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }
}

#[async_trait]
impl BrokerConnection for MockBroker {
    async fn connect(
        &mut self,
        identity: &ClientIdentity,
        credentials: Option<&Credentials>,
    ) -> Result<Connected, ConnectError> {
        self.connect_attempts += 1;
        self.identities.push(identity.to_string());
        self.credentials
            .push(credentials.map(|c| c.username.clone()));

        if self.refuse_next > 0 {
            self.refuse_next -= 1;
            self.state = ConnectionState::Disconnected("Connection refused".to_string());
            return Err(ConnectError::NetworkUnreachable(
                "connection refused".to_string(),
            ));
        }

        self.state = ConnectionState::Connected;
        Ok(Connected {
            client_id: identity.to_string(),
        })
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.clone()
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected {
                state: self.state.clone(),
            });
        }
        if self.fail_publishes {
            return Err(PublishError::Failed {
                topic: topic.to_string(),
                source: "outgoing queue full".into(),
            });
        }
        self.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), SubscribeError> {
        if !self.is_connected() {
            return Err(SubscribeError::NotConnected {
                state: self.state.clone(),
            });
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn pump(&mut self) -> Vec<InboundMessage> {
        if self.link_drop_pending {
            self.link_drop_pending = false;
            self.state = ConnectionState::Disconnected("Connection reset by peer".to_string());
        }
        if !self.is_connected() {
            return Vec::new();
        }
        self.inbound.drain(..).collect()
    }

    async fn disconnect(&mut self) {
        self.disconnects += 1;
        self.state = ConnectionState::Disconnected("Closed locally".to_string());
    }
}

/// Display that keeps everything it was asked to show
///
/// Clones share the record, so a test can keep one and hand another to the bridge.
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    shown: Arc<Mutex<Vec<DisplayMessage>>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<DisplayMessage> {
        self.shown.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl DisplaySink for RecordingDisplay {
    fn show(&mut self, message: &DisplayMessage) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(message.clone());
        }
    }
}

/// Network link that reports down for a fixed number of polls
#[derive(Debug)]
pub struct MockNetworkLink {
    down_polls: u32,
    polls: AtomicU32,
    gateway: Ipv4Addr,
    join_error: Option<String>,
    joined: Option<String>,
}

impl MockNetworkLink {
    /// Link that is down for the first `n` `is_up` checks
    pub fn up_after(n: u32) -> Self {
        Self {
            down_polls: n,
            polls: AtomicU32::new(0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            join_error: None,
            joined: None,
        }
    }

    pub fn failing_join(reason: &str) -> Self {
        Self {
            join_error: Some(reason.to_string()),
            ..Self::up_after(0)
        }
    }

    /// SSID passed to the last successful `connect`
    pub fn joined(&self) -> Option<&str> {
        self.joined.as_deref()
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkLink for MockNetworkLink {
    async fn connect(
        &mut self,
        ssid: Option<&str>,
        _password: Option<&str>,
    ) -> Result<(), NetworkError> {
        if let Some(reason) = &self.join_error {
            return Err(NetworkError::JoinFailed {
                ssid: ssid.unwrap_or_default().to_string(),
                reason: reason.clone(),
            });
        }
        self.joined = ssid.map(str::to_string);
        Ok(())
    }

    fn is_up(&self) -> bool {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst);
        seen >= self.down_polls
    }

    fn gateway_address(&self) -> Option<Ipv4Addr> {
        (self.polls() > self.down_polls).then_some(self.gateway)
    }

    fn local_address(&self) -> Option<IpAddr> {
        (self.polls() > self.down_polls).then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)))
    }
}
