//! TLS acceptor construction from certificate and key files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;

/// Error type for TLS material loading.
#[derive(Debug)]
pub enum TlsError {
    /// Failed to read a PEM file.
    Io(std::io::Error),
    /// The certificate file held no certificates.
    NoCertificates,
    /// The key file held no private key.
    NoPrivateKey,
    /// rustls rejected the certificate/key pair.
    Config(tokio_rustls::rustls::Error),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "Failed to read TLS material: {}", e),
            TlsError::NoCertificates => write!(f, "Certificate file holds no certificates"),
            TlsError::NoPrivateKey => write!(f, "Key file holds no private key"),
            TlsError::Config(e) => write!(f, "Invalid TLS configuration: {}", e),
        }
    }
}

impl std::error::Error for TlsError {}

/// Load a STARTTLS acceptor from PEM certificate and key files.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    let key = load_key(key_path)?;

    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(TlsError::Config)?;

    tracing::info!(
        cert = %cert_path.display(),
        "TLS acceptor configured"
    );

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(TlsError::Io)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Io)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(TlsError::Io)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(TlsError::Io)?
        .ok_or(TlsError::NoPrivateKey)
}
