//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Parse configured log levels
//! - Switch log verbosity at runtime
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - The active level lives in a [`LogControl`] owned by the orchestrator,
//!   not in ambient global state; only the signal path changes it
//! - The subscriber filter sits behind a reload layer so a level change
//!   applies without reinstalling the subscriber

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log level {0}")]
    InvalidLevel(String),

    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Parse a log level name.
///
/// Accepts the usual names in any case, plus `FATAL` and `PANIC`, which map
/// to ERROR.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    let trimmed = level.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "fatal" | "panic" => Ok(LevelFilter::ERROR),
        "warning" => Ok(LevelFilter::WARN),
        "" => Err(LoggingError::InvalidLevel(level.to_string())),
        other => LevelFilter::from_str(other).map_err(|_| LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Runtime handle to the process log level.
#[derive(Clone)]
pub struct LogControl {
    configured: LevelFilter,
    active: Arc<watch::Sender<LevelFilter>>,
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogControl {
    /// A control that tracks the level but is not attached to a subscriber.
    pub fn detached(configured: LevelFilter) -> Self {
        let (active, _) = watch::channel(configured);
        Self {
            configured,
            active: Arc::new(active),
            handle: None,
        }
    }

    pub fn configured_level(&self) -> LevelFilter {
        self.configured
    }

    pub fn active_level(&self) -> LevelFilter {
        *self.active.borrow()
    }

    /// Observe level changes.
    pub fn subscribe(&self) -> watch::Receiver<LevelFilter> {
        self.active.subscribe()
    }

    pub(crate) fn raise_verbosity(&self) {
        self.apply(LevelFilter::TRACE);
    }

    pub(crate) fn restore_verbosity(&self) {
        self.apply(self.configured);
    }

    fn apply(&self, level: LevelFilter) {
        let previous = self.active.send_replace(level);
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.reload(EnvFilter::new(level.to_string())) {
                tracing::warn!(error = %e, "Failed to reload log filter");
                return;
            }
        }
        tracing::info!(from = %previous, to = %level, "Log level changed");
    }
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("configured", &self.configured)
            .field("active", &self.active_level())
            .field("attached", &self.handle.is_some())
            .finish()
    }
}

/// Install the global subscriber at `level` and return its control handle.
pub fn init_logging(level: &str) -> Result<LogControl, LoggingError> {
    let configured = parse_level(level)?;
    let (filter, handle) = reload::Layer::new(EnvFilter::new(configured.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    let mut control = LogControl::detached(configured);
    control.handle = Some(handle);
    Ok(control)
}
