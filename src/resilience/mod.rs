//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Waiting for an external process to become reachable:
//!     → backoff.rs (exponential delay with jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Registration itself is never retried here; only readiness polling backs off
//! - Every wait also observes shutdown

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
