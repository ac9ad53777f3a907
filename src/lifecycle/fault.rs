//! One-shot fault channels.
//!
//! Every long-running subsystem hands the orchestrator a [`FaultWatch`]. It
//! stays silent while the subsystem is healthy and resolves exactly once:
//! either with the terminal error, or with a close event when the subsystem
//! went away without reporting one.
//!
//! ```text
//! Healthy ──report(err)──▶ Faulted
//!    │
//!    └──reporter dropped──▶ Closed
//! ```

use std::error::Error as StdError;
use std::fmt;

use tokio::sync::oneshot;

/// Boxed error carried by a fault channel.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Identifies which part of the endpoint produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Dataplane,
    SecureListener,
    Registration,
    Identity,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Dataplane => "dataplane",
            Subsystem::SecureListener => "secure-listener",
            Subsystem::Registration => "registration",
            Subsystem::Identity => "identity",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure reported by a subsystem.
#[derive(Debug)]
pub struct SubsystemFault {
    pub subsystem: Subsystem,
    pub error: BoxError,
}

impl fmt::Display for SubsystemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subsystem, self.error)
    }
}

impl StdError for SubsystemFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.error.as_ref())
    }
}

/// What a fault channel resolved to.
#[derive(Debug)]
pub enum FaultEvent {
    /// The subsystem reported an error.
    Fault(SubsystemFault),
    /// The subsystem dropped its reporter without an error.
    Closed(Subsystem),
}

impl FaultEvent {
    pub fn subsystem(&self) -> Subsystem {
        match self {
            FaultEvent::Fault(fault) => fault.subsystem,
            FaultEvent::Closed(subsystem) => *subsystem,
        }
    }

    /// Human-readable description used in logs and shutdown causes.
    pub fn message(&self) -> String {
        match self {
            FaultEvent::Fault(fault) => fault.error.to_string(),
            FaultEvent::Closed(_) => "subsystem exited without reporting an error".to_string(),
        }
    }
}

/// Sending half, owned by the subsystem's task.
#[derive(Debug)]
pub struct FaultReporter {
    subsystem: Subsystem,
    tx: oneshot::Sender<BoxError>,
}

impl FaultReporter {
    /// Report the terminal error. Consumes the reporter, so a subsystem can
    /// fault at most once.
    pub fn report(self, error: impl Into<BoxError>) {
        let error = error.into();
        if let Err(error) = self.tx.send(error) {
            tracing::debug!(
                subsystem = %self.subsystem,
                error = %error,
                "Fault reported after the watcher went away"
            );
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }
}

/// Receiving half, handed to the orchestrator.
#[derive(Debug)]
pub struct FaultWatch {
    subsystem: Subsystem,
    rx: oneshot::Receiver<BoxError>,
}

impl FaultWatch {
    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    /// Non-blocking check for a signal that is already waiting.
    pub fn try_pending(&mut self) -> Option<FaultEvent> {
        match self.rx.try_recv() {
            Ok(error) => Some(FaultEvent::Fault(SubsystemFault {
                subsystem: self.subsystem,
                error,
            })),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(FaultEvent::Closed(self.subsystem)),
        }
    }

    /// Wait for the channel to resolve.
    pub async fn recv(self) -> FaultEvent {
        match self.rx.await {
            Ok(error) => FaultEvent::Fault(SubsystemFault {
                subsystem: self.subsystem,
                error,
            }),
            Err(_) => FaultEvent::Closed(self.subsystem),
        }
    }
}

/// Create a fault channel for `subsystem`.
pub fn fault_channel(subsystem: Subsystem) -> (FaultReporter, FaultWatch) {
    let (tx, rx) = oneshot::channel();
    (FaultReporter { subsystem, tx }, FaultWatch { subsystem, rx })
}
