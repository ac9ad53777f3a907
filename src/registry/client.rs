//! Registration client.
//!
//! Wraps a registry transport in the client chain
//! (client info → authorize → socket handoff → transport) and turns a
//! [`RegistrationSpec`] into a registry call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use url::Url;

use crate::config::validation::SUPPORTED_SCHEMES;
use crate::observability::metrics;
use crate::registry::authorize::{Authorize, PermitAll, PolicyEvaluator};
use crate::registry::clientinfo::{client_info_from_env, ClientInfo};
use crate::registry::http::HttpRegistry;
use crate::registry::sendfd::SendFd;
use crate::registry::{PolicySet, RegistrationRecord, RegistrationSpec, RegistryError, RegistryTransport};

/// Builder for [`RegistrationClient`].
pub struct RegistrationClientBuilder {
    connect_to: String,
    policies: PolicySet,
    evaluator: Arc<dyn PolicyEvaluator>,
    client_info: Option<BTreeMap<String, String>>,
    tls: Option<Arc<ClientConfig>>,
    transport: Option<Arc<dyn RegistryTransport>>,
    token_lifetime: Option<Duration>,
}

impl RegistrationClientBuilder {
    pub fn policies(mut self, policies: PolicySet) -> Self {
        self.policies = policies;
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Labels added to every record. Defaults to [`client_info_from_env`].
    pub fn client_info(mut self, labels: BTreeMap<String, String>) -> Self {
        self.client_info = Some(labels);
        self
    }

    /// TLS for the HTTP transport.
    pub fn tls(mut self, tls: Arc<ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Use this transport instead of dialing `connect_to`.
    pub fn transport(mut self, transport: Arc<dyn RegistryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Records expire this long after each registration.
    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = Some(lifetime);
        self
    }

    /// Validate the URL and assemble the chain. Performs no I/O.
    pub fn build(self) -> Result<RegistrationClient, RegistryError> {
        if self.connect_to.trim().is_empty() {
            return Err(RegistryError::MissingConnectUrl);
        }
        let url = Url::parse(&self.connect_to).map_err(|_| RegistryError::InvalidUrl(self.connect_to.clone()))?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(RegistryError::UnsupportedScheme(url.scheme().to_string()));
        }

        let base: Arc<dyn RegistryTransport> = match (self.transport, self.tls) {
            (Some(transport), _) => transport,
            (None, Some(tls)) => Arc::new(HttpRegistry::new(&url, tls)?),
            (None, None) => return Err(RegistryError::MissingTransport),
        };

        let labels = self.client_info.unwrap_or_else(client_info_from_env);
        let chain = Arc::new(ClientInfo::new(
            labels,
            Arc::new(Authorize::new(
                self.policies,
                self.evaluator,
                Arc::new(SendFd::new(base)),
            )),
        ));

        Ok(RegistrationClient {
            connect_to: url,
            chain,
            token_lifetime: self.token_lifetime,
        })
    }
}

/// Registers and deregisters this endpoint with the mesh registry.
#[derive(Clone)]
pub struct RegistrationClient {
    connect_to: Url,
    chain: Arc<dyn RegistryTransport>,
    token_lifetime: Option<Duration>,
}

impl RegistrationClient {
    pub fn builder(connect_to: impl Into<String>) -> RegistrationClientBuilder {
        RegistrationClientBuilder {
            connect_to: connect_to.into(),
            policies: PolicySet::default(),
            evaluator: Arc::new(PermitAll),
            client_info: None,
            tls: None,
            transport: None,
            token_lifetime: None,
        }
    }

    pub fn connect_to(&self) -> &Url {
        &self.connect_to
    }

    /// Register `spec`. Not retried; the caller decides what a failure means.
    pub async fn register(&self, spec: &RegistrationSpec) -> Result<RegistrationRecord, RegistryError> {
        spec.validate()?;

        let mut record = RegistrationRecord::from_spec(spec);
        if let Some(lifetime) = self.token_lifetime {
            record = record.expiring_in(lifetime);
        }

        let result = self.chain.register(record).await;
        metrics::record_registration("register", result.is_ok());

        match result {
            Ok(stored) => {
                tracing::info!(
                    name = %stored.name,
                    url = %stored.url,
                    registry = %self.connect_to,
                    "Endpoint registered"
                );
                Ok(stored)
            }
            Err(e) => Err(RegistryError::Register {
                name: spec.name.clone(),
                source: Box::new(e),
            }),
        }
    }

    /// Remove the endpoint registered as `record`.
    pub async fn deregister(&self, record: &RegistrationRecord) -> Result<(), RegistryError> {
        let result = self.chain.unregister(record.clone()).await;
        metrics::record_registration("unregister", result.is_ok());

        result
            .map(|()| tracing::info!(name = %record.name, "Endpoint deregistered"))
            .map_err(|e| RegistryError::Unregister {
                name: record.name.clone(),
                source: Box::new(e),
            })
    }
}

impl std::fmt::Debug for RegistrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationClient")
            .field("connect_to", &self.connect_to.as_str())
            .field("token_lifetime", &self.token_lifetime)
            .finish_non_exhaustive()
    }
}
