//! Dataplane connection.
//!
//! # Data Flow
//! ```text
//! DataplaneConnector::connect
//!     → DataplaneTransport (process.rs in production, fakes in tests)
//!     → (DataplaneConnection, FaultWatch)
//!     → FaultWatch handed to the lifecycle monitor
//! ```
//!
//! # Design Decisions
//! - `connect` reports setup failures directly; once a connection exists,
//!   the only failure path is the fault channel
//! - The engine's own API is out of scope; the connection is a handle the
//!   firewall chain drives

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::UnixStream;

use crate::lifecycle::{FaultWatch, Shutdown};
use crate::observability::metrics;

pub mod process;

pub use process::ProcessDataplane;

#[derive(Debug, thiserror::Error)]
pub enum DataplaneError {
    #[error("failed to start dataplane {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("dataplane exited during startup with {0}")]
    ExitedDuringStartup(ExitStatus),

    #[error("dataplane exited with {0}")]
    Exited(ExitStatus),

    #[error("failed to wait for dataplane: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to connect to dataplane API at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dataplane connect cancelled")]
    Cancelled,
}

/// An established dataplane API connection.
#[derive(Debug)]
pub struct DataplaneConnection {
    address: String,
    stream: Option<UnixStream>,
}

impl DataplaneConnection {
    /// A connection without a local stream, for transports that manage
    /// their own channel.
    pub fn detached(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    pub fn from_stream(address: impl Into<String>, stream: UnixStream) -> Self {
        Self {
            address: address.into(),
            stream: Some(stream),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stream_mut(&mut self) -> Option<&mut UnixStream> {
        self.stream.as_mut()
    }
}

/// Something that can bring up the dataplane.
#[async_trait]
pub trait DataplaneTransport: Send + Sync + 'static {
    /// Connect, observing `shutdown` while waiting.
    async fn connect(&self, shutdown: &Shutdown) -> Result<(DataplaneConnection, FaultWatch), DataplaneError>;
}

/// Logging and metrics wrapper around a [`DataplaneTransport`].
#[derive(Clone)]
pub struct DataplaneConnector {
    transport: Arc<dyn DataplaneTransport>,
}

impl DataplaneConnector {
    pub fn new(transport: Arc<dyn DataplaneTransport>) -> Self {
        Self { transport }
    }

    pub async fn connect(&self, shutdown: &Shutdown) -> Result<(DataplaneConnection, FaultWatch), DataplaneError> {
        let started = Instant::now();
        tracing::info!("Connecting to dataplane");

        match self.transport.connect(shutdown).await {
            Ok((connection, faults)) => {
                metrics::record_dataplane_connect("success");
                tracing::info!(
                    address = connection.address(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Dataplane connected"
                );
                Ok((connection, faults))
            }
            Err(DataplaneError::Cancelled) => {
                metrics::record_dataplane_connect("cancelled");
                tracing::info!("Dataplane connect cancelled");
                Err(DataplaneError::Cancelled)
            }
            Err(e) => {
                metrics::record_dataplane_connect("failure");
                tracing::error!(error = %e, "Dataplane connect failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for DataplaneConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataplaneConnector").finish_non_exhaustive()
    }
}
