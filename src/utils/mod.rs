//! # Utility Modules
//!
//! Supporting utilities for logging and observability.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by `LoggingConfig`
//! - **Metrics**: per-server atomic counters with snapshots

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{Metrics, MetricsSnapshot};
