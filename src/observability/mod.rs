//! Observability for the tag bridge
//!
//! Structured logging setup and the bridge's operational counters.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{BridgeMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{bridge_span, mqtt_span, tag_span};
