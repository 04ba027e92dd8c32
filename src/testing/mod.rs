//! Testing utilities and mock implementations
//!
//! Stand-ins for the reader, the broker, the display and the network link so
//! the bridge can be driven end to end in tests, plus a log capture layer.

pub mod logs;
pub mod mocks;

pub use logs::{CapturedEvent, LogCapture};
pub use mocks::*;
