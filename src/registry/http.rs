//! Registry transport over mutually-authenticated HTTP/1.1.
//!
//! # Wire contract
//! - `POST /registry/v1/endpoints` with the JSON record → `200` + stored record
//! - `DELETE /registry/v1/endpoints/{name}` → `2xx`; `404` means already gone
//!
//! Each call dials a fresh connection. Every request carries `x-request-id`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use url::Url;
use uuid::Uuid;

use crate::registry::{RegistrationRecord, RegistryError, RegistryTransport};

pub const ENDPOINTS_PATH: &str = "/registry/v1/endpoints";
pub const X_REQUEST_ID: &str = "x-request-id";

const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
enum Target {
    Unix(PathBuf),
    Tcp(String),
}

#[derive(Clone)]
pub struct HttpRegistry {
    target: Target,
    authority: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
}

impl HttpRegistry {
    /// Accepts `unix://`, `tcp://` and `https://` URLs.
    pub fn new(url: &Url, tls: Arc<ClientConfig>) -> Result<Self, RegistryError> {
        let (target, host) = match url.scheme() {
            "unix" => (Target::Unix(PathBuf::from(url.path())), "localhost".to_string()),
            "tcp" | "https" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| RegistryError::InvalidUrl(url.to_string()))?
                    .to_string();
                let port = url
                    .port_or_known_default()
                    .ok_or_else(|| RegistryError::InvalidUrl(url.to_string()))?;
                (Target::Tcp(format!("{host}:{port}")), host)
            }
            other => return Err(RegistryError::UnsupportedScheme(other.to_string())),
        };

        let server_name = ServerName::try_from(host.trim_matches(['[', ']']).to_string())
            .map_err(|_| RegistryError::InvalidUrl(url.to_string()))?;

        Ok(Self {
            authority: match &target {
                Target::Unix(_) => "localhost".to_string(),
                Target::Tcp(addr) => addr.clone(),
            },
            target,
            server_name,
            connector: TlsConnector::from(tls),
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Bytes), RegistryError> {
        match &self.target {
            Target::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|source| RegistryError::Connect {
                    address: path.display().to_string(),
                    source,
                })?;
                self.exchange(stream, request).await
            }
            Target::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(|source| RegistryError::Connect {
                    address: addr.clone(),
                    source,
                })?;
                self.exchange(stream, request).await
            }
        }
    }

    async fn exchange<S>(&self, stream: S, request: Request<Body>) -> Result<(StatusCode, Bytes), RegistryError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let tls = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(RegistryError::Tls)?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(tls)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "Registry connection closed with error");
            }
        });

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| RegistryError::Body(e.to_string()))?;
        Ok((status, body))
    }

    fn request(&self, method: Method, path: String, body: Body) -> Result<Request<Body>, RegistryError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(method = %method, path = %path, request_id = %request_id, "Registry request");

        Ok(Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, &self.authority)
            .header(header::CONTENT_TYPE, "application/json")
            .header(X_REQUEST_ID, request_id)
            .body(body)?)
    }
}

impl std::fmt::Debug for HttpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistry")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

fn rejected(status: StatusCode, body: &Bytes) -> RegistryError {
    RegistryError::Rejected {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

#[async_trait]
impl RegistryTransport for HttpRegistry {
    async fn register(&self, record: RegistrationRecord) -> Result<RegistrationRecord, RegistryError> {
        let payload = serde_json::to_vec(&record).map_err(RegistryError::Decode)?;
        let request = self.request(Method::POST, ENDPOINTS_PATH.to_string(), Body::from(payload))?;

        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        serde_json::from_slice(&body).map_err(RegistryError::Decode)
    }

    async fn unregister(&self, record: RegistrationRecord) -> Result<(), RegistryError> {
        let name: String = url::form_urlencoded::byte_serialize(record.name.as_bytes()).collect();
        let request = self.request(Method::DELETE, format!("{ENDPOINTS_PATH}/{name}"), Body::empty())?;

        let (status, body) = self.send(request).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(rejected(status, &body))
        }
    }
}
