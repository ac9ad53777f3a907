//! Endpoint lifecycle orchestration.
//!
//! # Responsibilities
//! - Bind the secure listener, then connect the dataplane while it serves
//! - Fan their fault channels into the shared shutdown
//! - Register the listener with the mesh registry and keep it refreshed
//! - Handle control signals (termination, log verbosity)
//! - Drain: deregister, stop the listener, release the dataplane
//!
//! # Design Decisions
//! - Setup and registration failures are returned synchronously
//! - Runtime faults only ever arrive through the monitor
//! - The exit outcome is derived from the first recorded shutdown cause

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::LevelFilter;

use crate::config::validation::validate_config;
use crate::config::{ConfigError, EndpointConfig};
use crate::dataplane::{DataplaneConnector, DataplaneError, DataplaneTransport};
use crate::http::{endpoint_router, EndpointStatus};
use crate::identity::IdentitySource;
use crate::lifecycle::{
    ControlSignal, LifecycleError, LifecycleState, Monitor, Shutdown, ShutdownCause, StateTracker, Subsystem,
};
use crate::net::listener::{ListenerHandle, ListenerOptions, SecureListener};
use crate::net::tls;
use crate::observability::logging::parse_level;
use crate::observability::LogControl;
use crate::registry::{
    PermitAll, PolicyEvaluator, PolicySet, RegistrationClient, RegistrationRecord, RegistrationSpec, RegistryError,
    RegistryTransport,
};

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: EndpointConfig,
    identity: Option<Arc<dyn IdentitySource>>,
    dataplane: Option<Arc<dyn DataplaneTransport>>,
    registry: Option<Arc<dyn RegistryTransport>>,
    evaluator: Arc<dyn PolicyEvaluator>,
    client_info: Option<BTreeMap<String, String>>,
    log_control: Option<LogControl>,
    signals: Option<mpsc::Receiver<ControlSignal>>,
    router: Option<Router>,
    temp_root: Option<PathBuf>,
}

impl OrchestratorBuilder {
    pub fn identity(mut self, identity: Arc<dyn IdentitySource>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn dataplane(mut self, dataplane: Arc<dyn DataplaneTransport>) -> Self {
        self.dataplane = Some(dataplane);
        self
    }

    /// Registry transport to use instead of dialing `connect_to` over mTLS.
    pub fn registry_transport(mut self, transport: Arc<dyn RegistryTransport>) -> Self {
        self.registry = Some(transport);
        self
    }

    pub fn policy_evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn client_info(mut self, labels: BTreeMap<String, String>) -> Self {
        self.client_info = Some(labels);
        self
    }

    pub fn log_control(mut self, control: LogControl) -> Self {
        self.log_control = Some(control);
        self
    }

    /// Source of control signals, usually [`os_signals`](crate::lifecycle::os_signals).
    pub fn signals(mut self, signals: mpsc::Receiver<ControlSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Router served on the listener. Defaults to the endpoint status router.
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Parent directory of the listener's private directory.
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Validate the configuration. No subsystem is touched.
    pub fn build(self) -> Result<Orchestrator, LifecycleError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let identity = self.identity.ok_or_else(|| LifecycleError::Setup {
            subsystem: Subsystem::Identity,
            message: "no identity source configured".to_string(),
        })?;
        let dataplane = self.dataplane.ok_or_else(|| LifecycleError::Setup {
            subsystem: Subsystem::Dataplane,
            message: "no dataplane configured".to_string(),
        })?;

        let log_control = self.log_control.unwrap_or_else(|| {
            LogControl::detached(parse_level(&self.config.log_level).unwrap_or(LevelFilter::INFO))
        });

        Ok(Orchestrator {
            config: self.config,
            identity,
            dataplane: DataplaneConnector::new(dataplane),
            registry: self.registry,
            evaluator: self.evaluator,
            client_info: self.client_info,
            log_control,
            signals: self.signals,
            router: self.router,
            temp_root: self.temp_root,
            shutdown: Shutdown::new(),
            state: StateTracker::new(),
        })
    }
}

/// Owns the root shutdown and drives the endpoint from Starting to Stopped.
pub struct Orchestrator {
    config: EndpointConfig,
    identity: Arc<dyn IdentitySource>,
    dataplane: DataplaneConnector,
    registry: Option<Arc<dyn RegistryTransport>>,
    evaluator: Arc<dyn PolicyEvaluator>,
    client_info: Option<BTreeMap<String, String>>,
    log_control: LogControl,
    signals: Option<mpsc::Receiver<ControlSignal>>,
    router: Option<Router>,
    temp_root: Option<PathBuf>,
    shutdown: Shutdown,
    state: StateTracker,
}

impl Orchestrator {
    pub fn builder(config: EndpointConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            identity: None,
            dataplane: None,
            registry: None,
            evaluator: Arc::new(PermitAll),
            client_info: None,
            log_control: None,
            signals: None,
            router: None,
            temp_root: None,
        }
    }

    /// Handle to the root shutdown; triggering it stops the endpoint.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn log_control(&self) -> &LogControl {
        &self.log_control
    }

    /// Run until shutdown and drain.
    ///
    /// `Ok` when stopped by a signal or request; `Err` for setup failures,
    /// registration failures and runtime faults.
    pub async fn run(mut self) -> Result<(), LifecycleError> {
        let control = self.signals.take().map(|signals| {
            tokio::spawn(control_loop(signals, self.shutdown.clone(), self.log_control.clone()))
        });

        let outcome = self.serve().await;

        if let Some(control) = control {
            control.abort();
        }
        self.state.advance(LifecycleState::Stopped);

        match &outcome {
            Ok(()) => tracing::info!(cause = ?self.shutdown.cause().map(ToString::to_string), "Endpoint stopped"),
            Err(e) => tracing::error!(error = %e, "Endpoint stopped with failure"),
        }
        outcome
    }

    async fn serve(&mut self) -> Result<(), LifecycleError> {
        let server_tls = tls::server_config(self.identity.clone())
            .map_err(|e| self.setup_failed(Subsystem::SecureListener, e))?;
        let client_tls = tls::client_config(self.identity.clone())
            .map_err(|e| self.setup_failed(Subsystem::Registration, e))?;
        let client = self
            .registration_client(client_tls)
            .map_err(|e| self.setup_failed(Subsystem::Registration, e))?;

        let router = self.router.take().unwrap_or_else(|| {
            endpoint_router(EndpointStatus {
                name: self.config.name.clone(),
                service_name: self.config.service_name.clone(),
                acl_rules: self.config.acl_rules.len(),
                state: self.state.subscribe(),
            })
        });
        let options = ListenerOptions {
            name: self.config.name.clone(),
            listen_on: self.config.listen_on.clone(),
            temp_root: self.temp_root.clone(),
            tls: server_tls,
            router,
        };

        // A listener setup failure returns before the dataplane is started.
        // Listener faults are monitored while the dataplane connects.
        let (listener, listener_faults) = SecureListener::start(&self.shutdown, options)
            .map_err(|e| self.setup_failed(Subsystem::SecureListener, e))?;

        let mut monitor = Monitor::new(self.shutdown.clone());
        if let Err(e) = monitor.watch(listener_faults) {
            self.drain(None, listener, &client, monitor).await;
            return Err(e);
        }

        let (_connection, dataplane_faults) = match self.dataplane.connect(&self.shutdown).await {
            Ok(connected) => connected,
            Err(DataplaneError::Cancelled) if self.shutdown.is_triggered() => {
                self.drain(None, listener, &client, monitor).await;
                return self.outcome();
            }
            Err(e) => {
                let err = self.setup_failed(Subsystem::Dataplane, e);
                self.drain(None, listener, &client, monitor).await;
                return Err(err);
            }
        };

        if let Err(e) = monitor.watch(dataplane_faults) {
            self.drain(None, listener, &client, monitor).await;
            return Err(e);
        }

        let spec = RegistrationSpec {
            name: self.config.name.clone(),
            service_name: self.config.service_name.clone(),
            labels: self.config.labels.clone(),
            url: listener.listen_url().to_string(),
        };
        let registered = tokio::select! {
            registered = client.register(&spec) => registered,
            _ = self.shutdown.cancelled() => Err(RegistryError::Cancelled),
        };
        let record = match registered {
            Ok(record) => record,
            Err(RegistryError::Cancelled) => {
                self.drain(None, listener, &client, monitor).await;
                return self.outcome();
            }
            Err(e) => {
                tracing::error!(error = %e, "Registration failed");
                self.shutdown.trigger(ShutdownCause::Setup {
                    subsystem: Subsystem::Registration,
                    message: e.to_string(),
                });
                self.drain(None, listener, &client, monitor).await;
                return Err(LifecycleError::Registration(e));
            }
        };

        self.state.advance(LifecycleState::Running);
        tracing::info!(name = %record.name, url = %listener.listen_url(), "Endpoint running");

        let refresh = tokio::spawn(refresh_loop(
            client.clone(),
            spec,
            self.config.max_token_lifetime / 3,
            self.shutdown.child_token(),
        ));

        self.shutdown.cancelled().await;
        if let Some(cause) = self.shutdown.cause() {
            tracing::info!(cause = %cause, "Shutting down");
        }
        refresh.abort();

        self.drain(Some(record), listener, &client, monitor).await;
        self.outcome()
    }

    fn registration_client(&self, tls: Arc<rustls::ClientConfig>) -> Result<RegistrationClient, RegistryError> {
        let mut builder = RegistrationClient::builder(&self.config.connect_to)
            .policies(PolicySet::new(self.config.registry_client_policies.clone()))
            .evaluator(self.evaluator.clone())
            .tls(tls)
            .token_lifetime(self.config.max_token_lifetime);
        if let Some(transport) = &self.registry {
            builder = builder.transport(transport.clone());
        }
        if let Some(labels) = &self.client_info {
            builder = builder.client_info(labels.clone());
        }
        builder.build()
    }

    /// Log a setup failure and shut down.
    fn setup_failed(&self, subsystem: Subsystem, error: impl Display) -> LifecycleError {
        let message = error.to_string();
        tracing::error!(subsystem = %subsystem, error = %message, "Setup failed");
        self.shutdown.trigger(ShutdownCause::Setup {
            subsystem,
            message: message.clone(),
        });
        LifecycleError::Setup { subsystem, message }
    }

    /// Release everything. Each step is bounded by the drain timeout and
    /// failures are only logged.
    async fn drain(
        &self,
        record: Option<RegistrationRecord>,
        listener: ListenerHandle,
        client: &RegistrationClient,
        monitor: Monitor,
    ) {
        self.state.advance(LifecycleState::Draining);
        let limit = self.config.drain_timeout;

        if let Some(record) = record {
            match tokio::time::timeout(limit, client.deregister(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to deregister endpoint"),
                Err(_) => tracing::warn!(name = %record.name, "Deregistration timed out"),
            }
        }

        let dir = listener.tmp_dir().to_path_buf();
        tracing::debug!(
            socket = %listener.socket_path().display(),
            active_connections = listener.active_connections(),
            "Stopping listener"
        );
        if tokio::time::timeout(limit, listener.stop()).await.is_err() {
            tracing::warn!(dir = %dir.display(), "Listener did not stop in time");
        }

        tracing::debug!(
            observed = monitor.observed(),
            pending = monitor.pending_waits(),
            "Closing fault monitor"
        );
        monitor.close(limit).await;
    }

    fn outcome(&self) -> Result<(), LifecycleError> {
        match self.shutdown.cause() {
            Some(ShutdownCause::Fault { subsystem, message }) => Err(LifecycleError::Fault {
                subsystem: *subsystem,
                message: message.clone(),
            }),
            Some(ShutdownCause::Setup { subsystem, message }) => Err(LifecycleError::Setup {
                subsystem: *subsystem,
                message: message.clone(),
            }),
            Some(ShutdownCause::Signal(_)) | Some(ShutdownCause::Requested) | None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("name", &self.config.name)
            .field("state", &self.state.current())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

async fn control_loop(mut signals: mpsc::Receiver<ControlSignal>, shutdown: Shutdown, log: LogControl) {
    while let Some(signal) = signals.recv().await {
        match signal {
            ControlSignal::Terminate(name) => {
                if shutdown.trigger(ShutdownCause::Signal(name)) {
                    tracing::info!(signal = name, "Received signal, shutting down");
                } else {
                    tracing::debug!(signal = name, "Shutdown already in progress");
                }
            }
            ControlSignal::RaiseVerbosity => log.raise_verbosity(),
            ControlSignal::RestoreVerbosity => log.restore_verbosity(),
        }
    }
}

/// Re-register every `period` until cancelled. Failures are not fatal.
async fn refresh_loop(client: RegistrationClient, spec: RegistrationSpec, period: Duration, token: CancellationToken) {
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => match client.register(&spec).await {
                Ok(_) => tracing::debug!(name = %spec.name, "Registration refreshed"),
                Err(e) => tracing::warn!(error = %e, "Failed to refresh registration"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::dataplane::DataplaneConnection;
    use crate::lifecycle::FaultWatch;

    struct NoDataplane;

    #[async_trait::async_trait]
    impl DataplaneTransport for NoDataplane {
        async fn connect(&self, _: &Shutdown) -> Result<(DataplaneConnection, FaultWatch), DataplaneError> {
            Err(DataplaneError::Cancelled)
        }
    }

    fn identity() -> Arc<StaticIdentity> {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["fw1".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        Arc::new(StaticIdentity::from_pem(&cert.pem(), &key.serialize_pem(), &cert.pem()).unwrap())
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = Orchestrator::builder(EndpointConfig::default())
            .identity(identity())
            .dataplane(Arc::new(NoDataplane))
            .build()
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn test_build_requires_dataplane() {
        let config = EndpointConfig {
            service_name: "firewall".to_string(),
            ..EndpointConfig::default()
        };
        let err = Orchestrator::builder(config).identity(identity()).build().unwrap_err();
        assert!(matches!(err, LifecycleError::Setup { subsystem: Subsystem::Dataplane, .. }));
    }

    #[tokio::test]
    async fn test_control_loop_terminates_once() {
        let (tx, rx) = mpsc::channel(4);
        let shutdown = Shutdown::new();
        let log = LogControl::detached(LevelFilter::INFO);
        let task = tokio::spawn(control_loop(rx, shutdown.clone(), log.clone()));

        tx.send(ControlSignal::RaiseVerbosity).await.unwrap();
        tx.send(ControlSignal::Terminate("SIGTERM")).await.unwrap();
        tx.send(ControlSignal::Terminate("SIGINT")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(shutdown.cause(), Some(&ShutdownCause::Signal("SIGTERM")));
        assert_eq!(log.active_level(), LevelFilter::TRACE);
    }
}
