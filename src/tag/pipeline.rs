//! Tag read pipeline
//!
//! One `poll` turns a presented tag into at most one payload. The order is
//! fixed: presence, session, authentication, block read, decode. The session
//! is released before `poll` returns on every path that entered it.

use super::transceiver::{is_sector_trailer, AuthKey, TagSession, TagTransceiver};
use super::TagError;
use crate::observability::tag_span;
use crate::protocol::payload::{Payload, TextPolicy};
use tracing::debug;

pub struct TagReadPipeline<T: TagTransceiver> {
    reader: T,
    block: u8,
    key: AuthKey,
    cabin_id: u32,
    policy: TextPolicy,
}

impl<T: TagTransceiver> TagReadPipeline<T> {
    /// Build a pipeline reading `block`; sector trailers hold keys, not data
    pub fn new(reader: T, block: u8, cabin_id: u32, policy: TextPolicy) -> Result<Self, TagError> {
        if is_sector_trailer(block) {
            return Err(TagError::UnsafeBlock { block });
        }
        Ok(Self {
            reader,
            block,
            key: AuthKey::DEFAULT,
            cabin_id,
            policy,
        })
    }

    /// Non-blocking read of the tag in the field, if any
    ///
    /// `None` means nothing to report: no tag, or the session could not be
    /// started (transient, retried on the next call).
    pub fn poll(&mut self) -> Option<Result<Payload, TagError>> {
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
        debug!(target: "tag", "Tag session started");

        if let Err(status) = session.authenticate(self.block, &self.key) {
            return Some(Err(TagError::AuthFailed { status }));
        }

        let block = match session.read_block(self.block) {
            Ok(block) => block,
            Err(status) => return Some(Err(TagError::ReadFailed { status })),
        };
        drop(session);

        Some(Ok(Payload::from_block(&block, self.cabin_id, self.policy)))
    }

    pub fn block(&self) -> u8 {
        self.block
    }

    pub fn reader(&self) -> &T {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut T {
        &mut self.reader
    }
}
