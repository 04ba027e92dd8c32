//! Simulated reader fed through a channel.
//!
//! Stands in for the reader chip when running on a host: each
//! [`SimulatedTag`] sent through the [`ChannelTagHandle`] is one tag
//! presentation. The tag stays in the field until its session is ended.

use super::transceiver::{AuthKey, BlockData, StatusCode, TagTransceiver, Uid, BLOCK_SIZE};
use super::TagError;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the presentation queue
const PRESENTATION_QUEUE: usize = 32;

/// A tag as seen by the simulated reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedTag {
    uid: Uid,
    key: AuthKey,
    blocks: HashMap<u8, BlockData>,
}

impl SimulatedTag {
    /// Blank tag with a random 4 byte UID and the default key
    pub fn blank() -> Self {
        let random = uuid::Uuid::new_v4().as_u128() as u32;
        Self {
            uid: Uid::single_size(random.to_be_bytes()),
            key: AuthKey::DEFAULT,
            blocks: HashMap::new(),
        }
    }

    /// Tag whose `block` holds `text`, NUL padded
    pub fn with_text(block: u8, text: &str) -> Result<Self, TagError> {
        let data = BlockData::from_text(text).ok_or(TagError::TextTooLong { len: text.len() })?;
        let mut tag = Self::blank();
        tag.blocks.insert(block, data);
        Ok(tag)
    }

    /// Replace the sector key, so authentication with the default key fails
    pub fn with_key(mut self, key: AuthKey) -> Self {
        self.key = key;
        self
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn block(&self, block: u8) -> BlockData {
        self.blocks
            .get(&block)
            .copied()
            .unwrap_or(BlockData::new([0; BLOCK_SIZE]))
    }
}

/// Sending side used to present tags to a [`ChannelTransceiver`]
#[derive(Debug, Clone)]
pub struct ChannelTagHandle {
    tx: mpsc::Sender<SimulatedTag>,
}

impl ChannelTagHandle {
    /// Queue a presentation; fails once the reader is gone
    pub async fn present(&self, tag: SimulatedTag) -> Result<(), SimulatedTag> {
        self.tx.send(tag).await.map_err(|e| e.0)
    }
}

/// Reader that takes presentations from a channel without blocking
#[derive(Debug)]
pub struct ChannelTransceiver {
    rx: mpsc::Receiver<SimulatedTag>,
    in_field: Option<SimulatedTag>,
    authenticated: Option<u8>,
    released: usize,
    last_released: Option<SimulatedTag>,
}

impl ChannelTransceiver {
    pub fn new() -> (Self, ChannelTagHandle) {
        let (tx, rx) = mpsc::channel(PRESENTATION_QUEUE);
        let reader = Self {
            rx,
            in_field: None,
            authenticated: None,
            released: 0,
            last_released: None,
        };
        (reader, ChannelTagHandle { tx })
    }

    /// Number of sessions ended so far
    pub fn released(&self) -> usize {
        self.released
    }

    /// Most recently halted tag, with any writes applied
    pub fn last_released(&self) -> Option<&SimulatedTag> {
        self.last_released.as_ref()
    }

    fn session_tag(&mut self, block: u8) -> Result<&mut SimulatedTag, StatusCode> {
        if self.authenticated != Some(block / 4) {
            return Err(StatusCode::Error);
        }
        self.in_field.as_mut().ok_or(StatusCode::Timeout)
    }
}

impl TagTransceiver for ChannelTransceiver {
    fn presence_detected(&mut self) -> bool {
        if self.in_field.is_none() {
            self.in_field = self.rx.try_recv().ok();
        }
        self.in_field.is_some()
    }

    fn begin_session(&mut self) -> Result<Uid, StatusCode> {
        self.in_field
            .as_ref()
            .map(|tag| tag.uid.clone())
            .ok_or(StatusCode::Timeout)
    }

    fn authenticate(&mut self, block: u8, key: &AuthKey, uid: &Uid) -> Result<(), StatusCode> {
        let tag = self.in_field.as_ref().ok_or(StatusCode::Timeout)?;
        // A MIFARE Classic tag answering with the wrong key simply stops responding
        if tag.uid != *uid || tag.key != *key {
            return Err(StatusCode::Timeout);
        }
        self.authenticated = Some(block / 4);
        Ok(())
    }

    fn read_block(&mut self, block: u8) -> Result<BlockData, StatusCode> {
        Ok(self.session_tag(block)?.block(block))
    }

    fn write_block(&mut self, block: u8, data: &BlockData) -> Result<(), StatusCode> {
        self.session_tag(block)?.blocks.insert(block, *data);
        Ok(())
    }

    fn end_session(&mut self) {
        self.authenticated = None;
        if let Some(tag) = self.in_field.take() {
            debug!(target: "tag", uid = %tag.uid, "Tag halted");
            self.released += 1;
            self.last_released = Some(tag);
        }
    }
}
