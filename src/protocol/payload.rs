//! Tag event payloads
//!
//! A payload is the block text followed by the cabin suffix, e.g.
//! `"MERT2025GMLK9999 Cabin 2"`. Block bytes map 1:1 onto payload bytes, so
//! what was written to the tag is what reaches the broker.

use crate::tag::transceiver::{BlockData, BLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Delimiter placed between the block text and the cabin identifier
pub const CABIN_DELIMITER: &str = " Cabin ";

const SUFFIX_CAPACITY: usize = CABIN_DELIMITER.len() + 10;

/// Upper bound for a payload: one block, the delimiter and a `u32` cabin id
pub const PAYLOAD_CAPACITY: usize = BLOCK_SIZE + SUFFIX_CAPACITY;

/// How block bytes are turned into payload text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPolicy {
    /// Every byte passes through unchanged, including NUL and non-ASCII
    #[default]
    Raw,
    /// Trailing NUL and space padding is removed
    Trim,
    /// Padding is trimmed and any non-printable byte becomes `?`
    Printable,
}

impl TextPolicy {
    fn apply(&self, bytes: &[u8], out: &mut heapless::Vec<u8, PAYLOAD_CAPACITY>) {
        let text = match self {
            TextPolicy::Raw => bytes,
            TextPolicy::Trim | TextPolicy::Printable => trim_padding(bytes),
        };
        for &byte in text {
            let byte = match self {
                TextPolicy::Printable if !(0x20..0x7F).contains(&byte) => b'?',
                _ => byte,
            };
            // PAYLOAD_CAPACITY always leaves room for a full block
            let _ = out.push(byte);
        }
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0 && b != b' ')
        .map_or(0, |idx| idx + 1);
    &bytes[..end]
}

/// One candidate publication built from a tag read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(heapless::Vec<u8, PAYLOAD_CAPACITY>);

impl Payload {
    /// Decode a block and append the cabin suffix
    pub fn from_block(block: &BlockData, cabin_id: u32, policy: TextPolicy) -> Self {
        let mut buf = heapless::Vec::new();
        policy.apply(block.as_bytes(), &mut buf);

        let mut suffix: heapless::String<SUFFIX_CAPACITY> = heapless::String::new();
        // The suffix buffer is sized for the delimiter plus the widest u32
        let _ = write!(suffix, "{CABIN_DELIMITER}{cabin_id}");
        let _ = buf.extend_from_slice(suffix.as_bytes());
        Self(buf)
    }

    /// Raw bytes sent as the message body
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Payload {
    /// Bytes are shown one character each (Latin-1), matching the wire bytes 1:1
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in self.0.iter() {
            f.write_char(byte as char)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(bytes: &[u8]) -> BlockData {
        let mut raw = [0u8; BLOCK_SIZE];
        raw[..bytes.len()].copy_from_slice(bytes);
        BlockData::new(raw)
    }

    #[test]
    fn test_decode_full_block_with_cabin_suffix() {
        let payload = Payload::from_block(&block(b"MERT2025GMLK9999"), 2, TextPolicy::Raw);
        assert_eq!(payload.as_bytes(), b"MERT2025GMLK9999 Cabin 2");
        assert_eq!(payload.to_string(), "MERT2025GMLK9999 Cabin 2");
    }

    #[test]
    fn test_raw_policy_keeps_padding_and_nul() {
        let payload = Payload::from_block(&block(b"ABC"), 1, TextPolicy::Raw);
        let mut expected = b"ABC".to_vec();
        expected.extend_from_slice(&[0u8; 13]);
        expected.extend_from_slice(b" Cabin 1");
        assert_eq!(payload.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_raw_policy_passes_non_ascii_through() {
        let payload = Payload::from_block(&block(&[0xC7, 0x01, b'A']), 3, TextPolicy::Raw);
        assert_eq!(&payload.as_bytes()[..3], &[0xC7, 0x01, b'A']);
        assert!(payload.to_string().starts_with('\u{C7}'));
    }

    #[test]
    fn test_trim_policy_strips_trailing_padding_only() {
        let payload = Payload::from_block(&block(b" ID 42  \0\0"), 2, TextPolicy::Trim);
        assert_eq!(payload.as_bytes(), b" ID 42 Cabin 2");
    }

    #[test]
    fn test_printable_policy_replaces_control_bytes() {
        let payload = Payload::from_block(&block(&[b'A', 0x00, 0x7F, 0xFF, b'B']), 2, TextPolicy::Printable);
        assert_eq!(payload.as_bytes(), b"A???B Cabin 2");
    }

    #[test]
    fn test_all_padding_block_trims_to_suffix() {
        let payload = Payload::from_block(&block(&[]), 9, TextPolicy::Trim);
        assert_eq!(payload.as_bytes(), b" Cabin 9");
    }

    #[test]
    fn test_widest_cabin_id_fits() {
        let payload = Payload::from_block(&block(&[b'X'; BLOCK_SIZE]), u32::MAX, TextPolicy::Raw);
        assert_eq!(payload.len(), PAYLOAD_CAPACITY);
        assert!(payload.to_string().ends_with("Cabin 4294967295"));
    }

    #[test]
    fn test_text_policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: TextPolicy,
        }
        let parsed: Wrapper = toml::from_str(r#"policy = "printable""#).unwrap();
        assert_eq!(parsed.policy, TextPolicy::Printable);
    }
}
