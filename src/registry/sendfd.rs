//! Local handoff of the listening socket file.
//!
//! When the transport can take a file directly, a `unix://` URL is replaced
//! by `inode://<dev>/<ino>` on the way out, and the original URL is put back
//! into the record that comes back.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::{FileHandoff, RegistrationRecord, RegistryError, RegistryTransport};

const UNIX_SCHEME: &str = "unix://";

/// `inode://<dev>/<ino>` of the file at `path`.
pub fn inode_url(path: &Path) -> io::Result<String> {
    let meta = std::fs::metadata(path)?;
    Ok(format!("inode://{}/{}", meta.dev(), meta.ino()))
}

pub struct SendFd {
    inner: Arc<dyn RegistryTransport>,
}

impl SendFd {
    pub fn new(inner: Arc<dyn RegistryTransport>) -> Self {
        Self { inner }
    }

    /// Swap the URL for an inode URL if a handoff is possible.
    /// Returns the original URL when a swap happened.
    fn substitute(&self, record: &mut RegistrationRecord) -> Result<Option<String>, RegistryError> {
        let Some(handoff) = self.inner.file_handoff() else {
            return Ok(None);
        };
        let Some(path) = record.url.strip_prefix(UNIX_SCHEME) else {
            return Ok(None);
        };

        let inode = handoff.hand_off(Path::new(path))?;
        tracing::debug!(url = %record.url, inode = %inode, "Socket file handed off");
        Ok(Some(std::mem::replace(&mut record.url, inode)))
    }
}

#[async_trait]
impl RegistryTransport for SendFd {
    async fn register(&self, mut record: RegistrationRecord) -> Result<RegistrationRecord, RegistryError> {
        let original = self.substitute(&mut record)?;
        let mut stored = self.inner.register(record).await?;
        if let Some(url) = original {
            stored.url = url;
        }
        Ok(stored)
    }

    async fn unregister(&self, mut record: RegistrationRecord) -> Result<(), RegistryError> {
        // Records are removed by name; a failed handoff still unregisters.
        if let Err(e) = self.substitute(&mut record) {
            tracing::debug!(url = %record.url, error = %e, "Unregistering without file handoff");
        }
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

    fn record(url: String) -> RegistrationRecord {
        RegistrationRecord::from_spec(&RegistrationSpec {
            name: "fw1".to_string(),
            service_name: "firewall".to_string(),
            url,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_unix_url_handed_off_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("listen.on.sock");
        std::fs::write(&socket, b"").unwrap();
        let url = format!("unix://{}", socket.display());

        let registry = Arc::new(InMemoryRegistry::new());
        let sendfd = SendFd::new(registry.clone());

        let returned = sendfd.register(record(url.clone())).await.unwrap();
        assert_eq!(returned.url, url);

        let inode = inode_url(&socket).unwrap();
        assert_eq!(registry.get("fw1").unwrap().url, inode);
        assert_eq!(registry.handed_off(&inode), Some(socket.clone()));

        sendfd.unregister(record(url)).await.unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.handed_off(&inode), None);
    }

    #[tokio::test]
    async fn test_unregister_after_socket_removed_clears_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("listen.on.sock");
        std::fs::write(&socket, b"").unwrap();
        let url = format!("unix://{}", socket.display());

        let registry = Arc::new(InMemoryRegistry::new());
        let sendfd = SendFd::new(registry.clone());

        sendfd.register(record(url.clone())).await.unwrap();
        let inode = registry.get("fw1").unwrap().url;
        assert_eq!(registry.handed_off(&inode), Some(socket.clone()));

        std::fs::remove_file(&socket).unwrap();
        sendfd.unregister(record(url)).await.unwrap();

        assert!(registry.is_empty());
        assert_eq!(registry.handed_off(&inode), None);
    }

    #[tokio::test]
    async fn test_other_schemes_untouched() {
        let registry = Arc::new(InMemoryRegistry::new());
        let sendfd = SendFd::new(registry.clone());

        sendfd.register(record("tcp://10.0.0.1:5001".to_string())).await.unwrap();
        assert_eq!(registry.get("fw1").unwrap().url, "tcp://10.0.0.1:5001");
    }

    #[tokio::test]
    async fn test_missing_socket_fails() {
        let registry = Arc::new(InMemoryRegistry::new());
        let sendfd = SendFd::new(registry.clone());

        let err = sendfd
            .register(record("unix:///nonexistent/listen.on.sock".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::FileHandoff(_)));
    }
}
