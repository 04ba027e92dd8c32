//! Narrow interface to the contactless tag reader chip
//!
//! Everything below this trait (SPI framing, register access, anti-collision)
//! belongs to the reader driver. The bridge only speaks in sessions, blocks and
//! vendor status codes.

use std::fmt;
use thiserror::Error;

/// Size of a MIFARE Classic data block in bytes
pub const BLOCK_SIZE: usize = 16;

/// Longest UID a single ISO 14443A tag can report (triple size)
pub const MAX_UID_LEN: usize = 10;

/// Vendor status reported by the reader driver for a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusCode {
    #[error("Error in communication.")]
    Error,
    #[error("Collision detected.")]
    Collision,
    #[error("Timeout in communication.")]
    Timeout,
    #[error("A buffer is not big enough.")]
    NoRoom,
    #[error("Internal error in the code. Should not happen.")]
    InternalError,
    #[error("Invalid argument.")]
    Invalid,
    #[error("The CRC_A does not match.")]
    CrcWrong,
    #[error("A MIFARE PICC responded with NAK.")]
    MifareNack,
}

impl StatusCode {
    /// Short symbolic name used in structured log fields
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::Error => "STATUS_ERROR",
            StatusCode::Collision => "STATUS_COLLISION",
            StatusCode::Timeout => "STATUS_TIMEOUT",
            StatusCode::NoRoom => "STATUS_NO_ROOM",
            StatusCode::InternalError => "STATUS_INTERNAL_ERROR",
            StatusCode::Invalid => "STATUS_INVALID",
            StatusCode::CrcWrong => "STATUS_CRC_WRONG",
            StatusCode::MifareNack => "STATUS_MIFARE_NACK",
        }
    }
}

/// Opaque tag identifier, only used as authentication context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uid(heapless::Vec<u8, MAX_UID_LEN>);

impl Uid {
    /// Build a UID from raw bytes; ISO 14443A UIDs are 4, 7 or 10 bytes long
    pub fn new(bytes: &[u8]) -> Result<Self, StatusCode> {
        if !matches!(bytes.len(), 4 | 7 | 10) {
            return Err(StatusCode::Invalid);
        }
        heapless::Vec::from_slice(bytes)
            .map(Uid)
            .map_err(|_| StatusCode::NoRoom)
    }

    /// Single size (4 byte) UID, the common MIFARE Classic 1K case
    pub fn single_size(bytes: [u8; 4]) -> Self {
        let mut uid = heapless::Vec::new();
        for byte in bytes {
            // capacity is 10
            let _ = uid.push(byte);
        }
        Uid(uid)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Exactly one block of tag memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockData([u8; BLOCK_SIZE]);

impl BlockData {
    pub const fn new(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Encode identifier text into a block, right-padding with NUL.
    /// Returns `None` when the text does not fit.
    pub fn from_text(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() > BLOCK_SIZE {
            return None;
        }
        let mut block = [0u8; BLOCK_SIZE];
        block[..bytes.len()].copy_from_slice(bytes);
        Some(Self(block))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

/// Six byte MIFARE sector key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthKey([u8; 6]);

impl AuthKey {
    /// Factory transport key, all bits set
    pub const DEFAULT: AuthKey = AuthKey([0xFF; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(***)")
    }
}

/// True for the last block of each 4-block sector, which holds keys and access bits
pub fn is_sector_trailer(block: u8) -> bool {
    (block as u16 + 1) % 4 == 0
}

/// Reader chip operations the pipeline and writer are built on
///
/// Authentication always uses Key A semantics. Implementations must leave the
/// chip ready for the next tag after `end_session`.
pub trait TagTransceiver {
    /// Non-blocking check for a new tag in the field
    fn presence_detected(&mut self) -> bool;

    /// Select the tag and read its UID
    fn begin_session(&mut self) -> Result<Uid, StatusCode>;

    /// Authenticate `block` with `key` for the selected tag
    fn authenticate(&mut self, block: u8, key: &AuthKey, uid: &Uid) -> Result<(), StatusCode>;

    fn read_block(&mut self, block: u8) -> Result<BlockData, StatusCode>;

    fn write_block(&mut self, block: u8, data: &BlockData) -> Result<(), StatusCode>;

    /// Halt the tag and stop crypto
    fn end_session(&mut self);
}

impl<T: TagTransceiver + ?Sized> TagTransceiver for Box<T> {
    fn presence_detected(&mut self) -> bool {
        (**self).presence_detected()
    }

    fn begin_session(&mut self) -> Result<Uid, StatusCode> {
        (**self).begin_session()
    }

    fn authenticate(&mut self, block: u8, key: &AuthKey, uid: &Uid) -> Result<(), StatusCode> {
        (**self).authenticate(block, key, uid)
    }

    fn read_block(&mut self, block: u8) -> Result<BlockData, StatusCode> {
        (**self).read_block(block)
    }

    fn write_block(&mut self, block: u8, data: &BlockData) -> Result<(), StatusCode> {
        (**self).write_block(block, data)
    }

    fn end_session(&mut self) {
        (**self).end_session()
    }
}

/// An open session with one tag, released exactly once when dropped
pub struct TagSession<'a, T: TagTransceiver + ?Sized> {
    reader: &'a mut T,
    uid: Uid,
}

impl<'a, T: TagTransceiver + ?Sized> TagSession<'a, T> {
    /// Begin a session. On failure nothing was entered and nothing is released.
    pub fn begin(reader: &'a mut T) -> Result<Self, StatusCode> {
        let uid = reader.begin_session()?;
        Ok(Self { reader, uid })
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn authenticate(&mut self, block: u8, key: &AuthKey) -> Result<(), StatusCode> {
        self.reader.authenticate(block, key, &self.uid)
    }

    pub fn read_block(&mut self, block: u8) -> Result<BlockData, StatusCode> {
        self.reader.read_block(block)
    }

    pub fn write_block(&mut self, block: u8, data: &BlockData) -> Result<(), StatusCode> {
        self.reader.write_block(block, data)
    }
}

impl<T: TagTransceiver + ?Sized> Drop for TagSession<'_, T> {
    fn drop(&mut self) {
        self.reader.end_session();
    }
}
