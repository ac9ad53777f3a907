//! Registration payloads.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::registry::RegistryError;

/// Label set of one network service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLabels {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Ordered policy file locations, passed through unopened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet(Vec<String>);

impl PolicySet {
    pub fn new(sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(sources.into_iter().map(Into::into).collect())
    }

    pub fn sources(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What the caller wants registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationSpec {
    pub name: String,
    pub service_name: String,
    pub labels: BTreeMap<String, String>,
    pub url: String,
}

impl RegistrationSpec {
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (field, value) in [
            ("name", &self.name),
            ("service_name", &self.service_name),
            ("url", &self.url),
        ] {
            if value.trim().is_empty() {
                return Err(RegistryError::InvalidSpec(field));
            }
        }
        Ok(())
    }
}

/// The record exchanged with the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub name: String,
    pub network_service_names: Vec<String>,
    #[serde(default)]
    pub network_service_labels: BTreeMap<String, ServiceLabels>,
    pub url: String,
    /// Unix seconds after which the registry may drop the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<u64>,
}

impl RegistrationRecord {
    /// Map the single service name to its label set.
    pub fn from_spec(spec: &RegistrationSpec) -> Self {
        let mut network_service_labels = BTreeMap::new();
        network_service_labels.insert(
            spec.service_name.clone(),
            ServiceLabels {
                labels: spec.labels.clone(),
            },
        );

        Self {
            name: spec.name.clone(),
            network_service_names: vec![spec.service_name.clone()],
            network_service_labels,
            url: spec.url.clone(),
            expiration_time: None,
        }
    }

    /// Expire `lifetime` from now.
    pub fn expiring_in(mut self, lifetime: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.expiration_time = Some((now + lifetime).as_secs());
        self
    }
}
