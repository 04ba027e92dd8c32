//! Tag side of the bridge: reader interface, read pipeline and writer

pub mod channel;
pub mod pipeline;
pub mod transceiver;
pub mod writer;

pub use channel::{ChannelTagHandle, ChannelTransceiver, SimulatedTag};
pub use pipeline::TagReadPipeline;
pub use transceiver::{
    is_sector_trailer, AuthKey, BlockData, StatusCode, TagSession, TagTransceiver, Uid,
    BLOCK_SIZE,
};
pub use writer::{TagWriter, WriteOutcome};

use thiserror::Error;

/// A tag transaction that was entered but did not complete
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("Authentication failed: {status}")]
    AuthFailed { status: StatusCode },
    #[error("Reading failed: {status}")]
    ReadFailed { status: StatusCode },
    #[error("Writing failed: {status}")]
    WriteFailed { status: StatusCode },
    #[error("Read-back does not match the written block")]
    VerifyMismatch,
    #[error("Text is {len} bytes but a block holds at most 16")]
    TextTooLong { len: usize },
    #[error("Block {block} is not a usable data block")]
    UnsafeBlock { block: u8 },
}

impl TagError {
    /// Vendor status carried by the error, if the reader reported one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TagError::AuthFailed { status }
            | TagError::ReadFailed { status }
            | TagError::WriteFailed { status } => Some(*status),
            _ => None,
        }
    }
}
