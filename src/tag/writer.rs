//! Provisioning path: write an identifier into a tag's data block

use super::transceiver::{is_sector_trailer, AuthKey, BlockData, TagSession, TagTransceiver};
use super::TagError;
use crate::config::WriterSection;
use crate::observability::tag_span;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a completed write ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Block written; read-back disabled
    Written,
    /// Block written and read back identical
    Verified,
}

pub struct TagWriter<T: TagTransceiver> {
    reader: T,
    block: u8,
    key: AuthKey,
    settle: Duration,
    verify: bool,
}

impl<T: TagTransceiver> TagWriter<T> {
    /// Block 0 holds the manufacturer data and trailers hold keys; both are refused
    pub fn new(reader: T, block: u8, config: &WriterSection) -> Result<Self, TagError> {
        if block == 0 || is_sector_trailer(block) {
            return Err(TagError::UnsafeBlock { block });
        }
        Ok(Self {
            reader,
            block,
            key: AuthKey::DEFAULT,
            settle: Duration::from_millis(config.settle_ms),
            verify: config.verify,
        })
    }

    /// Encode text for a block: at most 16 bytes, NUL padded
    pub fn prepare(text: &str) -> Result<BlockData, TagError> {
        BlockData::from_text(text).ok_or(TagError::TextTooLong { len: text.len() })
    }

    /// Write `data` to the tag in the field, if any
    ///
    /// Returns `None` when no tag is present or no session could be started.
    /// After an attempted transaction the writer pauses for the settle delay
    /// so a tag left on the reader is not rewritten straight away.
    pub async fn write_once(&mut self, data: &BlockData) -> Option<Result<WriteOutcome, TagError>> {
        let result = self.transact(data)?;

        match &result {
            Ok(outcome) => info!(target: "tag", block = self.block, ?outcome, "Tag written"),
            Err(e) => warn!(target: "tag", block = self.block, "Tag write failed: {}", e),
        }

        tokio::time::sleep(self.settle).await;
        Some(result)
    }

    fn transact(&mut self, data: &BlockData) -> Option<Result<WriteOutcome, TagError>> {
        if !self.reader.presence_detected() {
            return None;
        }

        let mut session = match TagSession::begin(&mut self.reader) {
            Ok(session) => session,
            Err(status) => {
                debug!(target: "tag", status = status.name(), "Tag present but no session");
                return None;
            }
        };
        let _span = tag_span!(uid = %session.uid(), block = self.block).entered();

        if let Err(status) = session.authenticate(self.block, &self.key) {
            return Some(Err(TagError::AuthFailed { status }));
        }
        if let Err(status) = session.write_block(self.block, data) {
            return Some(Err(TagError::WriteFailed { status }));
        }
        if !self.verify {
            return Some(Ok(WriteOutcome::Written));
        }

        let outcome = match session.read_block(self.block) {
            Ok(read_back) if read_back == *data => Ok(WriteOutcome::Verified),
            Ok(_) => Err(TagError::VerifyMismatch),
            Err(status) => Err(TagError::ReadFailed { status }),
        };
        Some(outcome)
    }

    pub fn reader(&self) -> &T {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut T {
        &mut self.reader
    }
}
