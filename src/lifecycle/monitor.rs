//! Fan-in of subsystem fault channels.
//!
//! # Responsibilities
//! - Check each channel for a signal that is already waiting
//! - Wait on every channel independently in the background
//! - Turn the first fault from any channel into a shutdown
//!
//! # Design Decisions
//! - A pending fault at watch time is fatal: it is returned to the caller
//!   instead of being handed to a background wait
//! - Later faults are logged but cannot change the recorded cause
//! - A channel closing after shutdown started is the normal drain path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::lifecycle::fault::{FaultEvent, FaultWatch};
use crate::lifecycle::shutdown::{Shutdown, ShutdownCause};
use crate::lifecycle::LifecycleError;
use crate::observability::metrics;

/// Watches fault channels and drives the shared shutdown.
#[derive(Debug)]
pub struct Monitor {
    shutdown: Shutdown,
    waits: JoinSet<()>,
    observed: Arc<AtomicUsize>,
}

impl Monitor {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            waits: JoinSet::new(),
            observed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start monitoring a subsystem's fault channel.
    ///
    /// If the channel already resolved, shutdown is triggered right away and
    /// the fault is returned without spawning a background wait.
    pub fn watch(&mut self, mut faults: FaultWatch) -> Result<(), LifecycleError> {
        if let Some(event) = faults.try_pending() {
            self.observed.fetch_add(1, Ordering::SeqCst);
            let subsystem = event.subsystem();
            let message = event.message();
            tracing::error!(
                subsystem = %subsystem,
                error = %message,
                "Subsystem failed before monitoring started"
            );
            metrics::record_fault(subsystem);
            self.shutdown.trigger(ShutdownCause::Fault {
                subsystem,
                message: message.clone(),
            });
            return Err(LifecycleError::PendingFault { subsystem, message });
        }

        let shutdown = self.shutdown.clone();
        let observed = Arc::clone(&self.observed);
        let subsystem = faults.subsystem();
        tracing::debug!(subsystem = %subsystem, "Monitoring fault channel");

        self.waits.spawn(async move {
            let event = faults.recv().await;
            observed.fetch_add(1, Ordering::SeqCst);
            handle_event(&shutdown, event);
        });
        Ok(())
    }

    /// Number of background waits that have not finished yet.
    pub fn pending_waits(&self) -> usize {
        self.waits.len()
    }

    /// Number of channel resolutions seen so far.
    pub fn observed(&self) -> usize {
        self.observed.load(Ordering::SeqCst)
    }

    /// Give outstanding waits up to `grace` to observe their channel, then
    /// abort the rest.
    pub async fn close(mut self, grace: std::time::Duration) {
        let drained = tokio::time::timeout(grace, async {
            while self.waits.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::debug!(
                remaining = self.waits.len(),
                "Aborting fault monitors that did not resolve"
            );
            self.waits.shutdown().await;
        }
    }
}

fn handle_event(shutdown: &Shutdown, event: FaultEvent) {
    let subsystem = event.subsystem();

    if matches!(event, FaultEvent::Closed(_)) && shutdown.is_triggered() {
        tracing::debug!(subsystem = %subsystem, "Subsystem stopped during shutdown");
        return;
    }

    let message = event.message();
    metrics::record_fault(subsystem);

    let first = shutdown.trigger(ShutdownCause::Fault {
        subsystem,
        message: message.clone(),
    });
    if first {
        tracing::error!(
            subsystem = %subsystem,
            error = %message,
            "Subsystem failed, shutting down"
        );
    } else {
        tracing::error!(
            subsystem = %subsystem,
            error = %message,
            "Subsystem failed while shutdown already in progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::fault::{fault_channel, Subsystem};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pending_fault_is_fatal_without_background_wait() {
        let shutdown = Shutdown::new();
        let mut monitor = Monitor::new(shutdown.clone());

        let (reporter, watch) = fault_channel(Subsystem::Dataplane);
        reporter.report("vpp died");

        let result = monitor.watch(watch);
        assert!(matches!(
            result,
            Err(LifecycleError::PendingFault { subsystem: Subsystem::Dataplane, .. })
        ));
        assert_eq!(monitor.pending_waits(), 0);
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_background_fault_triggers_shutdown() {
        let shutdown = Shutdown::new();
        let mut monitor = Monitor::new(shutdown.clone());

        let (reporter, watch) = fault_channel(Subsystem::SecureListener);
        monitor.watch(watch).unwrap();
        assert_eq!(monitor.pending_waits(), 1);
        assert!(!shutdown.is_triggered());

        reporter.report("accept: too many open files");
        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();

        match shutdown.cause() {
            Some(ShutdownCause::Fault { subsystem, message }) => {
                assert_eq!(*subsystem, Subsystem::SecureListener);
                assert!(message.contains("too many open files"));
            }
            other => panic!("unexpected cause {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_many_faults_single_cause() {
        let shutdown = Shutdown::new();
        let mut monitor = Monitor::new(shutdown.clone());

        let mut reporters = Vec::new();
        for _ in 0..8 {
            let (reporter, watch) = fault_channel(Subsystem::Dataplane);
            monitor.watch(watch).unwrap();
            reporters.push(reporter);
        }
        for (i, reporter) in reporters.into_iter().enumerate() {
            reporter.report(format!("fault {}", i));
        }

        monitor.close(Duration::from_secs(1)).await;
        assert!(shutdown.is_triggered());
        assert!(matches!(shutdown.cause(), Some(ShutdownCause::Fault { .. })));
        // A later trigger never takes effect.
        assert!(!shutdown.trigger(ShutdownCause::Requested));
    }

    #[tokio::test]
    async fn test_close_after_shutdown_is_quiet() {
        let shutdown = Shutdown::new();
        let mut monitor = Monitor::new(shutdown.clone());

        let (reporter, watch) = fault_channel(Subsystem::Dataplane);
        monitor.watch(watch).unwrap();

        shutdown.trigger(ShutdownCause::Signal("SIGTERM"));
        drop(reporter);

        monitor.close(Duration::from_secs(1)).await;
        assert_eq!(shutdown.cause(), Some(&ShutdownCause::Signal("SIGTERM")));
    }

    #[tokio::test]
    async fn test_close_before_shutdown_triggers() {
        let shutdown = Shutdown::new();
        let mut monitor = Monitor::new(shutdown.clone());

        let (reporter, watch) = fault_channel(Subsystem::SecureListener);
        monitor.watch(watch).unwrap();
        drop(reporter);

        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
        assert!(shutdown.cause().map(ShutdownCause::is_failure).unwrap_or(false));
    }
}
