//! TLS termination material
//!
//! ## Responsibilities
//!
//! - Load the server identity and the trusted issuer pool from PEM files
//! - Build the rustls server config: mutual TLS, minimum TLS 1.2, and the
//!   revocation-checking peer verifier when a CRL is configured

mod verifier;

pub use verifier::RevokedPeerVerifier;

use crate::error::{Error, Result};
use crate::revocation::RevocationCache;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::path::Path;
use std::sync::Arc;

/// Server certificate chain and private key
pub struct ServerIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Load the server's certificate chain and key from PEM files
pub fn load_server_identity(cert_path: &Path, key_path: &Path) -> Result<ServerIdentity> {
    let cert_file = std::fs::File::open(cert_path).map_err(|e| {
        Error::Tls(format!(
            "server certificate '{}' unreadable: {e}",
            cert_path.display()
        ))
    })?;
    let cert_chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
            .collect::<std::io::Result<_>>()
            .map_err(|e| Error::Tls(format!("failed to parse server certificate: {e}")))?;
    if cert_chain.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates found in '{}'",
            cert_path.display()
        )));
    }

    let key_file = std::fs::File::open(key_path).map_err(|e| {
        Error::Tls(format!(
            "server key '{}' unreadable: {e}",
            key_path.display()
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|e| Error::Tls(format!("failed to parse server key: {e}")))?
        .ok_or_else(|| Error::Tls(format!("no private key found in '{}'", key_path.display())))?;

    Ok(ServerIdentity { cert_chain, key })
}

/// Load every certificate found in the trusted CA directory.
/// All files are iterated and appended to the pool.
pub fn load_trusted_issuers(dir: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Tls(format!(
            "failed to read trusted ca directory '{}': {e}",
            dir.display()
        ))
    })?;

    let mut issuers = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| Error::Tls(format!("failed to iterate trusted ca directory: {e}")))?
            .path();
        if !path.is_file() {
            continue;
        }
        let file = std::fs::File::open(&path)
            .map_err(|e| Error::Tls(format!("failed to read CA '{}': {e}", path.display())))?;
        for cert in rustls_pemfile::certs(&mut std::io::BufReader::new(file)) {
            let cert = cert
                .map_err(|e| Error::Tls(format!("failed to parse CA '{}': {e}", path.display())))?;
            issuers.push(cert);
        }
    }

    if issuers.is_empty() {
        return Err(Error::Tls(format!(
            "no trusted CA certificates found in '{}'",
            dir.display()
        )));
    }
    Ok(issuers)
}

/// Build the rustls server config.
///
/// Client certificates are always required and verified against the issuer
/// pool. Revocation checking is layered on only when a cache is supplied.
pub fn build_server_config(
    identity: ServerIdentity,
    issuers: Vec<CertificateDer<'static>>,
    revocation: Option<Arc<RevocationCache>>,
) -> Result<rustls::ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for issuer in &issuers {
        roots
            .add(issuer.clone())
            .map_err(|e| Error::Tls(format!("failed to add trusted CA to pool: {e}")))?;
    }

    let webpki_verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| Error::Tls(format!("failed to build client verifier: {e}")))?;

    let verifier: Arc<dyn rustls::server::danger::ClientCertVerifier> = match revocation {
        Some(cache) => Arc::new(RevokedPeerVerifier::new(webpki_verifier, issuers, cache)),
        None => webpki_verifier,
    };

    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| Error::Tls(format!("failed to select TLS versions: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(identity.cert_chain, identity.key)
        .map_err(|e| Error::Tls(format!("invalid server certificate/key: {e}")))?;

    Ok(config)
}
