//! Apple Push Notification service transports.
//!
//! [`legacy`] speaks the binary protocol over a raw TLS socket, [`http2`] the
//! provider API. Both authenticate with the same client certificate, loaded
//! from PEM files by [`ApnsTls`].

pub mod frame;
pub mod http2;
pub mod legacy;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::sync::OnceCell;

use crate::error::PushError;

pub use frame::{ApnsNotification, ErrorResponse};

/// Host and port of a binary-protocol gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsGateway {
    pub host: String,
    pub port: u16,
}

impl ApnsGateway {
    pub const PRODUCTION_HOST: &'static str = "gateway.push.apple.com";
    pub const SANDBOX_HOST: &'static str = "gateway.sandbox.push.apple.com";
    pub const PORT: u16 = 2195;

    pub fn production() -> Self {
        Self::new(Self::PRODUCTION_HOST, Self::PORT)
    }

    pub fn sandbox() -> Self {
        Self::new(Self::SANDBOX_HOST, Self::PORT)
    }

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn for_environment(production: bool) -> Self {
        if production {
            Self::production()
        } else {
            Self::sandbox()
        }
    }
}

impl std::fmt::Display for ApnsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Client certificate for APNs, loaded on first use.
///
/// Only a successful load is cached; after a failure the next caller reads
/// the files again.
#[derive(Debug)]
pub struct ApnsTls {
    cert_path: PathBuf,
    key_path: PathBuf,
    roots: Option<RootCertStore>,
    config: OnceCell<Arc<ClientConfig>>,
}

impl ApnsTls {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            roots: None,
            config: OnceCell::new(),
        }
    }

    /// Trust `roots` for the gateway instead of the webpki roots.
    pub fn with_root_certificates(mut self, roots: RootCertStore) -> Self {
        self.roots = Some(roots);
        self
    }

    /// rustls client configuration presenting the certificate.
    pub async fn client_config(&self) -> Result<Arc<ClientConfig>, PushError> {
        self.config
            .get_or_try_init(|| async {
                let chain = read_file(&self.cert_path).await?;
                let key = read_file(&self.key_path).await?;
                let roots = self.roots.clone().unwrap_or_else(|| RootCertStore {
                    roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
                });

                let config = build_client_config(&self.cert_path, &chain, &self.key_path, &key, roots)?;
                tracing::info!(cert = %self.cert_path.display(), "Loaded APNs client certificate");
                Ok::<_, PushError>(Arc::new(config))
            })
            .await
            .cloned()
    }

    /// Certificate chain and key concatenated into one PEM bundle.
    pub async fn identity_pem(&self) -> Result<Vec<u8>, PushError> {
        let mut pem = read_file(&self.cert_path).await?;
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend(read_file(&self.key_path).await?);
        Ok(pem)
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, PushError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| PushError::Certificate(format!("{}: {}", path.display(), e)))
}

fn build_client_config(
    cert_path: &Path,
    chain_pem: &[u8],
    key_path: &Path,
    key_pem: &[u8],
    roots: RootCertStore,
) -> Result<ClientConfig, PushError> {
    let certificate_error = |path: &Path, e: &dyn std::fmt::Display| {
        PushError::Certificate(format!("{}: {}", path.display(), e))
    };

    let chain = CertificateDer::pem_slice_iter(chain_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| certificate_error(cert_path, &e))?;
    if chain.is_empty() {
        return Err(certificate_error(cert_path, &"no certificate found"));
    }

    let key = PrivateKeyDer::from_pem_slice(key_pem).map_err(|e| certificate_error(key_path, &e))?;

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| PushError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| certificate_error(cert_path, &e))
}
