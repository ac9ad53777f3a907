//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (orchestrator.rs):
//!     Validate config → TLS → listener → dataplane → monitor → register → Running
//!
//! Fan-in (monitor.rs):
//!     fault channel (fault.rs) per subsystem → first fault → Shutdown
//!
//! Signals (signals.rs):
//!     SIGINT/SIGHUP/SIGTERM/SIGQUIT → Trigger graceful shutdown
//!     SIGUSR1/SIGUSR2 → Raise/restore log verbosity
//!
//! Shutdown (shutdown.rs):
//!     Cancel root token → Draining → deregister, stop listener → Stopped
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then subsystems, then registration
//! - One root cancellation token; the first cause wins
//! - Every drain step has a timeout so shutdown cannot hang

use crate::config::ConfigError;
use crate::registry::RegistryError;

pub mod fault;
pub mod monitor;
pub mod orchestrator;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use fault::{fault_channel, BoxError, FaultEvent, FaultReporter, FaultWatch, Subsystem, SubsystemFault};
pub use monitor::Monitor;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use shutdown::{Shutdown, ShutdownCause};
pub use signals::{os_signals, ControlSignal};
pub use state::{LifecycleState, StateTracker};

/// Why the endpoint did not end cleanly.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{subsystem} setup failed: {message}")]
    Setup { subsystem: Subsystem, message: String },

    #[error("{subsystem} failed before monitoring started: {message}")]
    PendingFault { subsystem: Subsystem, message: String },

    #[error("{0}")]
    Registration(#[source] RegistryError),

    #[error("{subsystem} fault: {message}")]
    Fault { subsystem: Subsystem, message: String },
}
