//! TLS configuration backed by the workload identity.
//!
//! Both configs resolve certificates per handshake, so an identity rotation
//! takes effect on the next connection without rebuilding anything. Peers
//! are authenticated by chain only; no name or SPIFFE ID constraint applies.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ParsedCertificate, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};

use crate::identity::{Identity, IdentityError, IdentitySource};

pub const SERVER_ALPN: [&[u8]; 2] = [b"h2", b"http/1.1"];
pub const CLIENT_ALPN: [&[u8]; 1] = [b"http/1.1"];

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("invalid identity material: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("failed to build certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// Server config requiring a client certificate issued by the trust bundle.
pub fn server_config(identity: Arc<dyn IdentitySource>) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let material = Arc::new(MaterialCache::new(identity, provider.clone()));
    material.get()?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_client_cert_verifier(Arc::new(BundleClientVerifier {
            material: material.clone(),
        }))
        .with_cert_resolver(Arc::new(IdentityResolver { material }));
    config.alpn_protocols = SERVER_ALPN.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

/// Client config presenting the workload certificate.
pub fn client_config(identity: Arc<dyn IdentitySource>) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let material = Arc::new(MaterialCache::new(identity, provider.clone()));
    material.get()?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(BundleServerVerifier {
            material: material.clone(),
        }))
        .with_client_cert_resolver(Arc::new(IdentityResolver { material }));
    config.alpn_protocols = CLIENT_ALPN.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

/// TLS material derived from one identity generation.
struct Material {
    generation: u64,
    certified: Arc<CertifiedKey>,
    roots: Arc<RootCertStore>,
    client_verifier: Arc<dyn ClientCertVerifier>,
}

impl Material {
    fn derive(identity: &Identity, provider: &Arc<CryptoProvider>) -> Result<Self, TlsError> {
        let signing_key = provider
            .key_provider
            .load_private_key(identity.private_key.clone_key())?;
        let certified = Arc::new(CertifiedKey::new(identity.cert_chain.clone(), signing_key));

        let mut roots = RootCertStore::empty();
        for anchor in &identity.trust_anchors {
            roots.add(anchor.clone())?;
        }
        let roots = Arc::new(roots);

        let client_verifier = WebPkiClientVerifier::builder_with_provider(roots.clone(), provider.clone()).build()?;

        Ok(Self {
            generation: identity.generation,
            certified,
            roots,
            client_verifier,
        })
    }
}

struct MaterialCache {
    source: Arc<dyn IdentitySource>,
    provider: Arc<CryptoProvider>,
    cached: ArcSwapOption<Material>,
}

impl MaterialCache {
    fn new(source: Arc<dyn IdentitySource>, provider: Arc<CryptoProvider>) -> Self {
        Self {
            source,
            provider,
            cached: ArcSwapOption::empty(),
        }
    }

    fn get(&self) -> Result<Arc<Material>, TlsError> {
        let identity = self.source.current()?;
        if let Some(material) = self.cached.load_full() {
            if material.generation == identity.generation {
                return Ok(material);
            }
        }

        let material = Arc::new(Material::derive(&identity, &self.provider)?);
        self.cached.store(Some(material.clone()));
        tracing::debug!(generation = material.generation, "TLS material derived");
        Ok(material)
    }

    fn get_or_reject(&self) -> Result<Arc<Material>, rustls::Error> {
        self.get().map_err(|e| rustls::Error::General(e.to_string()))
    }

    fn algorithms(&self) -> &WebPkiSupportedAlgorithms {
        &self.provider.signature_verification_algorithms
    }
}

impl fmt::Debug for MaterialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generation = self.cached.load().as_ref().map(|m| m.generation);
        f.debug_struct("MaterialCache")
            .field("generation", &generation)
            .finish_non_exhaustive()
    }
}

/// Serves the current workload certificate on both sides of a handshake.
#[derive(Debug)]
struct IdentityResolver {
    material: Arc<MaterialCache>,
}

impl IdentityResolver {
    fn resolve_current(&self) -> Option<Arc<CertifiedKey>> {
        match self.material.get() {
            Ok(material) => Some(material.certified.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "No certificate available for handshake");
                None
            }
        }
    }
}

impl ResolvesServerCert for IdentityResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.resolve_current()
    }
}

impl ResolvesClientCert for IdentityResolver {
    fn resolve(&self, _root_hint_subjects: &[&[u8]], _sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        self.resolve_current()
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct BundleClientVerifier {
    material: Arc<MaterialCache>,
}

impl ClientCertVerifier for BundleClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        self.material
            .get_or_reject()?
            .client_verifier
            .verify_client_cert(end_entity, intermediates, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, self.material.algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, self.material.algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.material.algorithms().supported_schemes()
    }
}

/// Validates the server chain against the trust bundle, ignoring the name.
#[derive(Debug)]
struct BundleServerVerifier {
    material: Arc<MaterialCache>,
}

impl ServerCertVerifier for BundleServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let material = self.material.get_or_reject()?;
        let cert = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &cert,
            &material.roots,
            intermediates,
            now,
            self.material.algorithms().all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, self.material.algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, self.material.algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.material.algorithms().supported_schemes()
    }
}
