//! Endpoint lifecycle state machine.
//!
//! # States
//! ```text
//! Starting → Running → Draining → Stopped
//! ```
//! Starting may also go straight to Draining when setup fails.
//!
//! # Design Decisions
//! - Transitions only move forward; a request to go back is ignored
//! - Observers subscribe through a watch channel

use std::fmt;

use tokio::sync::watch;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// Numeric value exported on the lifecycle gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            LifecycleState::Starting => 0.0,
            LifecycleState::Running => 1.0,
            LifecycleState::Draining => 2.0,
            LifecycleState::Stopped => 3.0,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current lifecycle state.
#[derive(Debug)]
pub struct StateTracker {
    tx: watch::Sender<LifecycleState>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Starting);
        Self { tx }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns whether the transition happened.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let advanced = self.tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });

        if advanced {
            tracing::info!(state = %next, "Lifecycle state changed");
            metrics::record_lifecycle_state(next);
        } else {
            tracing::debug!(
                requested = %next,
                current = %self.current(),
                "Ignoring lifecycle transition"
            );
        }
        advanced
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.current(), LifecycleState::Starting);

        assert!(tracker.advance(LifecycleState::Running));
        assert!(tracker.advance(LifecycleState::Draining));
        assert!(tracker.advance(LifecycleState::Stopped));
        assert_eq!(tracker.current(), LifecycleState::Stopped);
    }

    #[test]
    fn test_no_reverse_transition() {
        let tracker = StateTracker::new();
        tracker.advance(LifecycleState::Draining);

        assert!(!tracker.advance(LifecycleState::Running));
        assert!(!tracker.advance(LifecycleState::Draining));
        assert_eq!(tracker.current(), LifecycleState::Draining);
    }

    #[test]
    fn test_setup_failure_skips_running() {
        let tracker = StateTracker::new();
        assert!(tracker.advance(LifecycleState::Draining));
        assert!(tracker.advance(LifecycleState::Stopped));
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();
        tracker.advance(LifecycleState::Running);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Running);
    }
}
