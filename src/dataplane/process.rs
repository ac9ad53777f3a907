//! Dataplane run as a child process with a unix API socket.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::DataplaneConfig;
use crate::dataplane::{DataplaneConnection, DataplaneError, DataplaneTransport};
use crate::lifecycle::{fault_channel, FaultReporter, FaultWatch, Shutdown, Subsystem};
use crate::resilience::Backoff;

const POLL_BASE: Duration = Duration::from_millis(50);
const POLL_MAX: Duration = Duration::from_secs(1);

/// Starts the dataplane and dials its API socket.
#[derive(Debug, Clone)]
pub struct ProcessDataplane {
    config: DataplaneConfig,
    poll_base: Duration,
    poll_max: Duration,
}

impl ProcessDataplane {
    pub fn new(config: DataplaneConfig) -> Self {
        Self {
            config,
            poll_base: POLL_BASE,
            poll_max: POLL_MAX,
        }
    }

    /// Override the socket polling backoff.
    pub fn with_poll_interval(mut self, base: Duration, max: Duration) -> Self {
        self.poll_base = base;
        self.poll_max = max;
        self
    }

    fn spawn(&self) -> Result<Child, DataplaneError> {
        Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DataplaneError::Spawn {
                command: self.config.command.clone(),
                source,
            })
    }
}

#[async_trait]
impl DataplaneTransport for ProcessDataplane {
    async fn connect(&self, shutdown: &Shutdown) -> Result<(DataplaneConnection, FaultWatch), DataplaneError> {
        let mut child = self.spawn()?;
        tracing::info!(command = %self.config.command, pid = ?child.id(), "Dataplane process started");

        let socket = &self.config.api_socket;
        let mut backoff = Backoff::new(self.poll_base, self.poll_max);

        // The child is killed on drop, so every early return below stops it.
        let stream = loop {
            match UnixStream::connect(socket).await {
                Ok(stream) => break stream,
                Err(e) if is_not_ready(&e) => {
                    tracing::trace!(socket = %socket.display(), attempt = backoff.attempts(), "Dataplane API not ready");
                }
                Err(source) => {
                    return Err(DataplaneError::Connect {
                        path: socket.clone(),
                        source,
                    })
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = shutdown.cancelled() => return Err(DataplaneError::Cancelled),
                status = child.wait() => {
                    return Err(match status {
                        Ok(status) => DataplaneError::ExitedDuringStartup(status),
                        Err(e) => DataplaneError::Wait(e),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let (reporter, faults) = fault_channel(Subsystem::Dataplane);
        tokio::spawn(supervise(child, shutdown.child_token(), reporter));

        let address = format!("unix://{}", socket.display());
        Ok((DataplaneConnection::from_stream(address, stream), faults))
    }
}

fn is_not_ready(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

/// Report the child's exit as a fault; kill it on shutdown.
async fn supervise(mut child: Child, token: CancellationToken, reporter: FaultReporter) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => reporter.report(DataplaneError::Exited(status)),
            Err(e) => reporter.report(DataplaneError::Wait(e)),
        },
        _ = token.cancelled() => {
            match child.kill().await {
                Ok(()) => tracing::info!("Dataplane process stopped"),
                Err(e) => tracing::warn!(error = %e, "Failed to stop dataplane process"),
            }
        }
    }
}
