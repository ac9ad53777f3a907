//! Enriches records with labels describing where the endpoint runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::{FileHandoff, RegistrationRecord, RegistryError, RegistryTransport};

/// Environment variable → label name.
pub const CLIENT_INFO_ENV: [(&str, &str); 3] = [
    ("NODE_NAME", "nodeName"),
    ("POD_NAME", "podName"),
    ("CLUSTER_NAME", "clusterName"),
];

/// Labels from [`CLIENT_INFO_ENV`] that are set in the process environment.
pub fn client_info_from_env() -> BTreeMap<String, String> {
    CLIENT_INFO_ENV
        .iter()
        .filter_map(|(var, label)| {
            std::env::var(var)
                .ok()
                .filter(|value| !value.is_empty())
                .map(|value| (label.to_string(), value))
        })
        .collect()
}

pub struct ClientInfo {
    labels: BTreeMap<String, String>,
    inner: Arc<dyn RegistryTransport>,
}

impl ClientInfo {
    pub fn new(labels: BTreeMap<String, String>, inner: Arc<dyn RegistryTransport>) -> Self {
        Self { labels, inner }
    }

    /// Add missing labels to every service. Labels already set win.
    fn enrich(&self, mut record: RegistrationRecord) -> RegistrationRecord {
        for service in record.network_service_labels.values_mut() {
            for (key, value) in &self.labels {
                service.labels.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        record
    }
}

#[async_trait]
impl RegistryTransport for ClientInfo {
    async fn register(&self, record: RegistrationRecord) -> Result<RegistrationRecord, RegistryError> {
        self.inner.register(self.enrich(record)).await
    }

    async fn unregister(&self, record: RegistrationRecord) -> Result<(), RegistryError> {
        self.inner.unregister(record).await
    }

    fn file_handoff(&self) -> Option<&dyn FileHandoff> {
        self.inner.file_handoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryRegistry, RegistrationSpec};

    #[tokio::test]
    async fn test_adds_missing_labels_only() {
        let registry = Arc::new(InMemoryRegistry::new());
        let info = ClientInfo::new(
            BTreeMap::from([
                ("nodeName".to_string(), "node-a".to_string()),
                ("app".to_string(), "ignored".to_string()),
            ]),
            registry.clone(),
        );

        let record = RegistrationRecord::from_spec(&RegistrationSpec {
            name: "fw1".to_string(),
            service_name: "firewall".to_string(),
            labels: BTreeMap::from([("app".to_string(), "fw".to_string())]),
            url: "tcp://127.0.0.1:5000".to_string(),
        });
        info.register(record).await.unwrap();

        let stored = registry.get("fw1").unwrap();
        let labels = &stored.network_service_labels["firewall"].labels;
        assert_eq!(labels["app"], "fw");
        assert_eq!(labels["nodeName"], "node-a");
    }
}
