//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, runtime level control)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Log level changes flow through an explicit LogControl handle
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogControl};
