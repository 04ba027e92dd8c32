//! Wire-level message shapes for the tag bridge
//!
//! Tag events and heartbeats are plain text bodies; the only structured
//! inbound message is the colon-delimited display record.

pub mod display;
pub mod payload;
pub mod topics;

pub use display::{DisplayMessage, DisplaySink, LogDisplay};
pub use payload::{Payload, TextPolicy, CABIN_DELIMITER, PAYLOAD_CAPACITY};
pub use topics::*;
