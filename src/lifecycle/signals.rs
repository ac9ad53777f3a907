//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGINT, SIGHUP, SIGTERM, SIGQUIT, SIGUSR1, SIGUSR2)
//! - Translate signals to [`ControlSignal`] events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - All termination signals map to the same graceful shutdown
//! - SIGUSR1/SIGUSR2 only touch log verbosity, never the lifecycle
//! - The orchestrator consumes a channel, so tests can feed events directly

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;

/// Control events delivered to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Graceful shutdown request, carrying the signal name.
    Terminate(&'static str),
    /// Switch logging to the most verbose level.
    RaiseVerbosity,
    /// Switch logging back to the configured level.
    RestoreVerbosity,
}

/// Signals that request a graceful shutdown.
pub const TERMINATION_SIGNALS: [(&str, fn() -> SignalKind); 4] = [
    ("SIGINT", SignalKind::interrupt),
    ("SIGHUP", SignalKind::hangup),
    ("SIGTERM", SignalKind::terminate),
    ("SIGQUIT", SignalKind::quit),
];

/// Install OS signal handlers and forward them as [`ControlSignal`]s.
///
/// Handlers are registered before this returns, so a failure to install any
/// of them is reported synchronously.
pub fn os_signals() -> std::io::Result<mpsc::Receiver<ControlSignal>> {
    let (tx, rx) = mpsc::channel(16);

    for (name, kind) in TERMINATION_SIGNALS {
        let stream = signal(kind())?;
        forward(stream, ControlSignal::Terminate(name), tx.clone());
    }
    forward(
        signal(SignalKind::user_defined1())?,
        ControlSignal::RaiseVerbosity,
        tx.clone(),
    );
    forward(
        signal(SignalKind::user_defined2())?,
        ControlSignal::RestoreVerbosity,
        tx,
    );

    Ok(rx)
}

fn forward(mut stream: Signal, event: ControlSignal, tx: mpsc::Sender<ControlSignal>) {
    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            tracing::debug!(signal = ?event, "Signal received");
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
}
