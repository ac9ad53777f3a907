//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

use firewall_nse::config::EndpointConfig;
use firewall_nse::dataplane::{DataplaneConnection, DataplaneError, DataplaneTransport};
use firewall_nse::identity::StaticIdentity;
use firewall_nse::lifecycle::{fault_channel, FaultReporter, FaultWatch, Shutdown, Subsystem};
use firewall_nse::registry::{FileHandoff, InMemoryRegistry, RegistrationRecord, RegistryError, RegistryTransport};

/// A throwaway CA issuing workload certificates.
pub struct TestPki {
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = params.self_signed(&ca_key).unwrap();
        Self { ca_cert, ca_key }
    }

    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// Leaf certificate for `name`, trusting this CA.
    pub fn identity(&self, name: &str) -> Arc<StaticIdentity> {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![name.to_string()])
            .unwrap()
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .unwrap();
        Arc::new(StaticIdentity::from_pem(&cert.pem(), &key.serialize_pem(), &self.ca_pem()).unwrap())
    }
}

/// Endpoint configuration for the firewall scenario.
pub fn endpoint_config(name: &str) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        service_name: "firewall".to_string(),
        labels: BTreeMap::from([("app".to_string(), "fw".to_string())]),
        connect_to: "unix:///unused/registry.sock".to_string(),
        max_token_lifetime: Duration::from_secs(60),
        drain_timeout: Duration::from_secs(2),
        ..EndpointConfig::default()
    }
}

/// Dataplane that connects instantly and faults on demand.
pub struct FakeDataplane {
    reporter: Arc<Mutex<Option<FaultReporter>>>,
    fail_at_startup: bool,
    connects: AtomicUsize,
}

impl FakeDataplane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reporter: Arc::new(Mutex::new(None)),
            fail_at_startup: false,
            connects: AtomicUsize::new(0),
        })
    }

    /// Reports its fault before `connect` even returns.
    pub fn failing_at_startup() -> Arc<Self> {
        Arc::new(Self {
            reporter: Arc::new(Mutex::new(None)),
            fail_at_startup: true,
            connects: AtomicUsize::new(0),
        })
    }

    /// Returns false when no connection is live.
    pub fn inject_fault(&self, message: &str) -> bool {
        match self.reporter.lock().unwrap().take() {
            Some(reporter) => {
                reporter.report(message.to_string());
                true
            }
            None => false,
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataplaneTransport for FakeDataplane {
    async fn connect(&self, shutdown: &Shutdown) -> Result<(DataplaneConnection, FaultWatch), DataplaneError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (reporter, watch) = fault_channel(Subsystem::Dataplane);
        if self.fail_at_startup {
            reporter.report("api socket vanished".to_string());
        } else {
            *self.reporter.lock().unwrap() = Some(reporter);
            // Release the reporter on shutdown like a supervised process would.
            let token = shutdown.child_token();
            let slot = Arc::clone(&self.reporter);
            tokio::spawn(async move {
                token.cancelled().await;
                slot.lock().unwrap().take();
            });
        }
        Ok((DataplaneConnection::detached("fake://dataplane"), watch))
    }
}

/// Dataplane whose connect never completes until shutdown.
#[derive(Default)]
pub struct StalledDataplane {
    connects: AtomicUsize,
}

impl StalledDataplane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataplaneTransport for StalledDataplane {
    async fn connect(&self, shutdown: &Shutdown) -> Result<(DataplaneConnection, FaultWatch), DataplaneError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        shutdown.cancelled().await;
        Err(DataplaneError::Cancelled)
    }
}

/// In-memory registry that also records the order of calls.
#[derive(Default)]
pub struct RecordingRegistry {
    pub inner: InMemoryRegistry,
    calls: Mutex<Vec<String>>,
}

impl RecordingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryTransport for RecordingRegistry {
    async fn register(&self, record: RegistrationRecord) -> Result<RegistrationRecord, RegistryError> {
        self.calls.lock().unwrap().push(format!("register:{}", record.name));
        self.inner.register(record).await
    }

    async fn unregister(&self, record: RegistrationRecord) -> Result<(), RegistryError> {
        self.calls.lock().unwrap().push(format!("unregister:{}", record.name));
        self.inner.unregister(record).await
    }

    fn file_handoff(&self) -> Option<&dyn FileHandoff> {
        self.inner.file_handoff()
    }
}

/// Registry server speaking the HTTP wire contract, backed by memory.
pub fn registry_router(store: Arc<InMemoryRegistry>) -> Router {
    Router::new()
        .route("/registry/v1/endpoints", post(register_endpoint))
        .route("/registry/v1/endpoints/{name}", delete(unregister_endpoint))
        .with_state(store)
}

async fn register_endpoint(
    State(store): State<Arc<InMemoryRegistry>>,
    Json(record): Json<RegistrationRecord>,
) -> Json<RegistrationRecord> {
    Json(store.insert(record))
}

async fn unregister_endpoint(State(store): State<Arc<InMemoryRegistry>>, Path(name): Path<String>) -> StatusCode {
    if store.remove(&name) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Number of entries left under `dir`.
pub fn entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
