//! Workload identity.
//!
//! # Data Flow
//! ```text
//! SPIFFE helper writes PEM files
//!     → files.rs (load, hold current Identity, reload on change)
//!     → IdentitySource::current()
//!     → net::tls resolvers (per handshake)
//! ```
//!
//! # Design Decisions
//! - The endpoint only reads identity material; issuing and rotation belong
//!   to the external helper
//! - Each reload yields a new generation so derived TLS material can be
//!   cached and invalidated cheaply

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

pub mod files;

pub use files::FileIdentitySource;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("identity source unavailable: {0}")]
    Unavailable(String),

    #[error("failed to watch identity files: {0}")]
    Watch(#[from] notify::Error),
}

/// Certificate chain, private key and trust bundle of this workload.
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub trust_anchors: Vec<CertificateDer<'static>>,
    /// Bumped whenever the material changes.
    pub generation: u64,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificates", &self.cert_chain.len())
            .field("trust_anchors", &self.trust_anchors.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Source of the current workload identity.
pub trait IdentitySource: Send + Sync + 'static {
    fn current(&self) -> Result<Arc<Identity>, IdentityError>;
}

/// Identity material that never changes.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    identity: Arc<Identity>,
}

impl StaticIdentity {
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
        trust_anchors: Vec<CertificateDer<'static>>,
    ) -> Self {
        Self {
            identity: Arc::new(Identity {
                cert_chain,
                private_key,
                trust_anchors,
                generation: 0,
            }),
        }
    }

    /// Build from PEM text.
    pub fn from_pem(cert_chain: &str, private_key: &str, trust_bundle: &str) -> Result<Self, IdentityError> {
        let origin = Path::new("<memory>");
        Ok(Self::new(
            parse_certificates(origin, cert_chain.as_bytes())?,
            parse_private_key(origin, private_key.as_bytes())?,
            parse_certificates(origin, trust_bundle.as_bytes())?,
        ))
    }
}

impl IdentitySource for StaticIdentity {
    fn current(&self) -> Result<Arc<Identity>, IdentityError> {
        Ok(self.identity.clone())
    }
}

pub(crate) fn parse_certificates(
    origin: &Path,
    mut pem: &[u8],
) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
    let certs = rustls_pemfile::certs(&mut pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| IdentityError::Io {
            path: origin.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(IdentityError::NoCertificates(origin.to_path_buf()));
    }
    Ok(certs)
}

pub(crate) fn parse_private_key(
    origin: &Path,
    mut pem: &[u8],
) -> Result<PrivateKeyDer<'static>, IdentityError> {
    rustls_pemfile::private_key(&mut pem)
        .map_err(|source| IdentityError::Io {
            path: origin.to_path_buf(),
            source,
        })?
        .ok_or_else(|| IdentityError::NoPrivateKey(origin.to_path_buf()))
}
