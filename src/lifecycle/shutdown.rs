//! Shutdown coordination for the endpoint.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::lifecycle::fault::Subsystem;

/// Why the endpoint started draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// An operator termination signal (SIGINT, SIGTERM, ...).
    Signal(&'static str),
    /// A running subsystem failed asynchronously.
    Fault { subsystem: Subsystem, message: String },
    /// A subsystem could not be brought up.
    Setup { subsystem: Subsystem, message: String },
    /// Programmatic stop request.
    Requested,
}

impl ShutdownCause {
    /// Whether this cause should end the process with a failure status.
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownCause::Fault { .. } | ShutdownCause::Setup { .. })
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Signal(name) => write!(f, "received {}", name),
            ShutdownCause::Fault { subsystem, message } => {
                write!(f, "{} fault: {}", subsystem, message)
            }
            ShutdownCause::Setup { subsystem, message } => {
                write!(f, "{} setup failed: {}", subsystem, message)
            }
            ShutdownCause::Requested => write!(f, "stop requested"),
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Wraps the root cancellation token that every long-running task observes.
/// Only the first trigger has effect; its cause is kept for the exit decision.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    cause: Arc<OnceLock<ShutdownCause>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the shutdown signal.
    ///
    /// Returns `true` for the call that actually started the shutdown and
    /// `false` for every later call.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        let first = self.cause.set(cause).is_ok();
        self.token.cancel();
        first
    }

    /// The cause recorded by the first trigger, if any.
    pub fn cause(&self) -> Option<&ShutdownCause> {
        self.cause.get()
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A token cancelled with the root, which can also be cancelled on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .field("cause", &self.cause())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        assert!(shutdown.trigger(ShutdownCause::Signal("SIGTERM")));
        assert!(!shutdown.trigger(ShutdownCause::Requested));
        assert!(!shutdown.trigger(ShutdownCause::Fault {
            subsystem: Subsystem::Dataplane,
            message: "late".into(),
        }));

        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.cause(), Some(&ShutdownCause::Signal("SIGTERM")));
    }

    #[test]
    fn test_clones_share_state() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        other.trigger(ShutdownCause::Requested);
        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.cause(), Some(&ShutdownCause::Requested));
    }

    #[test]
    fn test_failure_causes() {
        assert!(!ShutdownCause::Signal("SIGINT").is_failure());
        assert!(!ShutdownCause::Requested.is_failure());
        assert!(ShutdownCause::Setup {
            subsystem: Subsystem::SecureListener,
            message: "no tmp".into(),
        }
        .is_failure());
    }

    #[tokio::test]
    async fn test_child_token_follows_root() {
        let shutdown = Shutdown::new();
        let child = shutdown.child_token();
        shutdown.trigger(ShutdownCause::Requested);
        tokio::time::timeout(std::time::Duration::from_secs(1), child.cancelled())
            .await
            .expect("child token should be cancelled with the root");
    }
}
