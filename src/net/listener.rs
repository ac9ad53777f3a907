//! Mutually-authenticated listener on a private unix socket.
//!
//! # Responsibilities
//! - Allocate a process-unique temporary directory for the socket
//! - Bind, TLS-accept and serve HTTP connections with the caller's router
//! - Report accept failures on the listener's fault channel
//! - Remove the directory on every exit path
//!
//! # Design Decisions
//! - The serving task owns the `TempDir`; whichever way the task ends, the
//!   directory goes with it
//! - Handshake and per-connection errors only affect that connection

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::{fault_channel, FaultReporter, FaultWatch, Shutdown, Subsystem};
use crate::net::connection::ConnectionTracker;
use crate::observability::metrics;

/// How long open connections get to notice cancellation before being aborted.
const CONNECTION_GRACE: Duration = Duration::from_secs(1);

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to create listener directory under {root}: {source}")]
    TempDir {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// What to serve and where.
pub struct ListenerOptions {
    /// Prefix of the temporary directory.
    pub name: String,
    /// Socket file name inside the directory.
    pub listen_on: String,
    /// Parent of the temporary directory; the system temp dir when unset.
    pub temp_root: Option<PathBuf>,
    pub tls: Arc<ServerConfig>,
    pub router: Router,
}

pub struct SecureListener;

impl SecureListener {
    /// Allocate the socket directory, bind and begin serving.
    ///
    /// Setup failures are returned directly and leave nothing on disk. Once
    /// serving, faults arrive on the returned watch. Must be called from
    /// within a tokio runtime.
    pub fn start(shutdown: &Shutdown, options: ListenerOptions) -> Result<(ListenerHandle, FaultWatch), ListenerError> {
        let root = options.temp_root.clone().unwrap_or_else(std::env::temp_dir);
        let tmp_dir = tempfile::Builder::new()
            .prefix(&options.name)
            .tempdir_in(&root)
            .map_err(|source| ListenerError::TempDir { root, source })?;

        let socket_path = tmp_dir.path().join(&options.listen_on);
        let listener = UnixListener::bind(&socket_path).map_err(|source| ListenerError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        let listen_url = format!("unix://{}", socket_path.display());
        tracing::info!(url = %listen_url, "Listener bound");

        let token = shutdown.child_token();
        let tracker = ConnectionTracker::new();
        let (reporter, watch) = fault_channel(Subsystem::SecureListener);

        let task = tokio::spawn(serve(Serving {
            tmp_dir,
            incoming: listener,
            acceptor: TlsAcceptor::from(options.tls),
            router: options.router,
            token: token.clone(),
            tracker: tracker.clone(),
            reporter,
        }));

        let handle = ListenerHandle {
            tmp_path: socket_path.parent().map(Path::to_path_buf).unwrap_or_default(),
            listen_url,
            socket_path,
            token,
            tracker,
            task,
        };
        Ok((handle, watch))
    }
}

/// Handle to a serving listener.
#[derive(Debug)]
pub struct ListenerHandle {
    listen_url: String,
    socket_path: PathBuf,
    tmp_path: PathBuf,
    token: CancellationToken,
    tracker: ConnectionTracker,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// `unix://<tmp dir>/<socket>`.
    pub fn listen_url(&self) -> &str {
        &self.listen_url
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// The private directory holding the socket.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_path
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop serving and wait until the directory has been removed.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Listener task ended abnormally");
        }
    }
}

/// Source of accepted streams for the serving loop.
#[async_trait]
trait Incoming: Send + 'static {
    async fn next_stream(&mut self) -> io::Result<UnixStream>;
}

#[async_trait]
impl Incoming for UnixListener {
    async fn next_stream(&mut self) -> io::Result<UnixStream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

struct Serving<I> {
    tmp_dir: TempDir,
    incoming: I,
    acceptor: TlsAcceptor,
    router: Router,
    token: CancellationToken,
    tracker: ConnectionTracker,
    reporter: FaultReporter,
}

async fn serve<I: Incoming>(serving: Serving<I>) {
    let Serving {
        tmp_dir,
        mut incoming,
        acceptor,
        router,
        token,
        tracker,
        reporter,
    } = serving;

    let mut connections = JoinSet::new();

    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => break Ok(()),
            accepted = incoming.next_stream() => match accepted {
                Ok(stream) => {
                    connections.spawn(handle_connection(
                        stream,
                        acceptor.clone(),
                        router.clone(),
                        token.clone(),
                        tracker.clone(),
                    ));
                }
                Err(e) => break Err(ListenerError::Accept(e)),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    drop(incoming);
    if !tracker.wait_idle(CONNECTION_GRACE).await {
        tracing::debug!(active = tracker.active_count(), "Aborting connections still in flight");
    }
    connections.shutdown().await;

    let dir = tmp_dir.path().to_path_buf();
    match tmp_dir.close() {
        Ok(()) => tracing::info!(dir = %dir.display(), "Listener directory removed"),
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove listener directory"),
    }

    match outcome {
        Ok(()) => tracing::debug!("Listener stopped"),
        Err(e) => {
            tracing::error!(error = %e, "Listener failed");
            reporter.report(e);
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    acceptor: TlsAcceptor,
    router: Router,
    token: CancellationToken,
    tracker: ConnectionTracker,
) {
    let guard = tracker.track();

    let tls = tokio::select! {
        _ = token.cancelled() => return,
        tls = acceptor.accept(stream) => match tls {
            Ok(tls) => tls,
            Err(e) => {
                metrics::record_connection("handshake_failed");
                tracing::debug!(connection_id = %guard.id(), error = %e, "TLS handshake failed");
                return;
            }
        },
    };
    metrics::record_connection("accepted");

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(tls), TowerToHyperService::new(router));

    tokio::select! {
        _ = token.cancelled() => {}
        result = connection => {
            if let Err(e) = result {
                tracing::debug!(connection_id = %guard.id(), error = %e, "Connection error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::lifecycle::FaultEvent;
    use crate::net::tls;

    struct FailingIncoming;

    #[async_trait]
    impl Incoming for FailingIncoming {
        async fn next_stream(&mut self) -> io::Result<UnixStream> {
            Err(io::Error::other("too many open files"))
        }
    }

    fn acceptor() -> TlsAcceptor {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["fw1".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let identity = StaticIdentity::from_pem(&cert.pem(), &key.serialize_pem(), &cert.pem()).unwrap();
        TlsAcceptor::from(tls::server_config(Arc::new(identity)).unwrap())
    }

    #[tokio::test]
    async fn test_accept_fault_reports_and_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let tmp_dir = tempfile::Builder::new().prefix("fw1").tempdir_in(root.path()).unwrap();
        let dir = tmp_dir.path().to_path_buf();
        std::fs::write(dir.join("listen.on.sock"), b"").unwrap();
        let (reporter, faults) = fault_channel(Subsystem::SecureListener);

        let task = tokio::spawn(serve(Serving {
            tmp_dir,
            incoming: FailingIncoming,
            acceptor: acceptor(),
            router: Router::new(),
            token: CancellationToken::new(),
            tracker: ConnectionTracker::new(),
            reporter,
        }));

        match faults.recv().await {
            FaultEvent::Fault(fault) => {
                assert_eq!(fault.subsystem, Subsystem::SecureListener);
                assert!(fault.error.to_string().contains("too many open files"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        task.await.unwrap();
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_channel_without_fault() {
        let root = tempfile::tempdir().unwrap();
        let tmp_dir = tempfile::Builder::new().prefix("fw1").tempdir_in(root.path()).unwrap();
        let dir = tmp_dir.path().to_path_buf();
        let listener = UnixListener::bind(dir.join("listen.on.sock")).unwrap();
        let token = CancellationToken::new();
        let (reporter, faults) = fault_channel(Subsystem::SecureListener);

        let task = tokio::spawn(serve(Serving {
            tmp_dir,
            incoming: listener,
            acceptor: acceptor(),
            router: Router::new(),
            token: token.clone(),
            tracker: ConnectionTracker::new(),
            reporter,
        }));

        token.cancel();
        assert!(matches!(faults.recv().await, FaultEvent::Closed(Subsystem::SecureListener)));
        task.await.unwrap();
        assert!(!dir.exists());
    }
}
