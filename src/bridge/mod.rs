//! The tag-to-broker control loop and its components

pub mod gate;
pub mod heartbeat;
pub mod lifecycle;

pub use gate::{PublishGate, PublishRecord};
pub use heartbeat::{HeartbeatEvent, HeartbeatScheduler};
pub use lifecycle::{interruptible_sleep, Bridge, Iteration};
