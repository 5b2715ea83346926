//! TLS support for the chat relay.
//!
//! The server side loads a PEM-encoded certificate chain and private key into
//! a rustls `ServerConfig` wrapped in a `TlsAcceptor`. The client side builds
//! a `TlsConnector` that accepts whatever certificate the server presents:
//! the relay only promises an encrypted channel, not server authentication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    DigitallySignedStruct, SignatureScheme,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Errors that can occur when loading the server identity.
#[derive(Debug)]
pub enum TlsError {
    /// Failed to read the certificate file.
    CertRead(PathBuf, std::io::Error),
    /// Failed to read the private key file.
    KeyRead(PathBuf, std::io::Error),
    /// No certificates found in the PEM file.
    NoCerts(PathBuf),
    /// No private key found in the PEM file.
    NoKey(PathBuf),
    /// rustls rejected the certificate/key pair.
    Config(rustls::Error),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CertRead(path, e) => {
                write!(f, "failed to read TLS certificate {}: {}", path.display(), e)
            }
            Self::KeyRead(path, e) => {
                write!(f, "failed to read TLS key {}: {}", path.display(), e)
            }
            Self::NoCerts(path) => write!(f, "no certificates found in {}", path.display()),
            Self::NoKey(path) => write!(f, "no private key found in {}", path.display()),
            Self::Config(e) => write!(f, "failed to build TLS config: {}", e),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CertRead(_, e) | Self::KeyRead(_, e) => Some(e),
            Self::Config(e) => Some(e),
            Self::NoCerts(_) | Self::NoKey(_) => None,
        }
    }
}

fn install_crypto_provider() {
    // Idempotent; a second install just returns Err.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Load the server identity from PEM files, returning a `TlsAcceptor` ready
/// to upgrade accepted TCP streams.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = read_cert_chain(cert_path)?;
    let key = read_private_key(key_path)?;

    install_crypto_provider();
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(TlsError::Config)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let read_err = |e| TlsError::CertRead(path.to_path_buf(), e);
    let pem = std::fs::read(path).map_err(read_err)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    if certs.is_empty() {
        return Err(TlsError::NoCerts(path.to_path_buf()));
    }
    Ok(certs)
}

// PKCS#8, PKCS#1 and SEC1 keys are all accepted; the first one found wins.
fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let read_err = |e| TlsError::KeyRead(path.to_path_buf(), e);
    let pem = std::fs::read(path).map_err(read_err)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(read_err)?
        .ok_or_else(|| TlsError::NoKey(path.to_path_buf()))
}

/// Build the client-side connector. No server certificate is verified.
pub fn client_connector() -> TlsConnector {
    install_crypto_provider();

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[derive(Debug, Default)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}
