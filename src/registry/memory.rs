//! In-process registry.
//!
//! Stores records keyed by endpoint name. Used by tests and for running the
//! endpoint without a mesh.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::registry::sendfd::inode_url;
use crate::registry::{FileHandoff, RegistrationRecord, RegistryError, RegistryTransport};

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: DashMap<String, RegistrationRecord>,
    files: DashMap<String, PathBuf>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<RegistrationRecord> {
        self.records.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Names of all registered endpoints, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.records.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// The file handed off under `inode`, if any.
    pub fn handed_off(&self, inode: &str) -> Option<PathBuf> {
        self.files.get(inode).map(|entry| entry.value().clone())
    }

    /// Insert or replace; registering an identical record again is not an error.
    pub fn insert(&self, record: RegistrationRecord) -> RegistrationRecord {
        self.records.insert(record.name.clone(), record.clone());
        record
    }

    /// Returns whether a record was removed.
    pub fn remove(&self, name: &str) -> bool {
        self.records.remove(name).is_some()
    }
}

#[async_trait]
impl RegistryTransport for InMemoryRegistry {
    async fn register(&self, record: RegistrationRecord) -> Result<RegistrationRecord, RegistryError> {
        tracing::debug!(name = %record.name, url = %record.url, "Endpoint stored");
        Ok(self.insert(record))
    }

    async fn unregister(&self, record: RegistrationRecord) -> Result<(), RegistryError> {
        if self.remove(&record.name) {
            tracing::debug!(name = %record.name, "Endpoint removed");
        }
        match record.url.strip_prefix("unix://") {
            // The socket may already be gone, so match the handed-off path.
            Some(path) => self.files.retain(|_, handed| handed.as_path() != Path::new(path)),
            None => {
                self.files.remove(&record.url);
            }
        }
        Ok(())
    }

    fn file_handoff(&self) -> Option<&dyn FileHandoff> {
        Some(self)
    }
}

impl FileHandoff for InMemoryRegistry {
    fn hand_off(&self, path: &Path) -> Result<String, RegistryError> {
        let inode = inode_url(path).map_err(RegistryError::FileHandoff)?;
        self.files.insert(inode.clone(), path.to_path_buf());
        Ok(inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrationSpec;

    fn record(name: &str) -> RegistrationRecord {
        RegistrationRecord::from_spec(&RegistrationSpec {
            name: name.to_string(),
            service_name: "firewall".to_string(),
            url: "tcp://127.0.0.1:1".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_register_twice_is_idempotent() {
        let registry = InMemoryRegistry::new();
        registry.register(record("fw1")).await.unwrap();
        registry.register(record("fw1")).await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_ok() {
        let registry = InMemoryRegistry::new();
        registry.register(record("fw1")).await.unwrap();
        registry.unregister(record("fw2")).await.unwrap();
        assert_eq!(registry.names(), vec!["fw1"]);
    }
}
