//! Revocation-checking peer verifier
//!
//! Wraps the webpki client verifier: the inner verifier enforces the chain
//! against the trusted issuer pool, then the current revocation list is
//! checked. The CRL signature is verified against the issuer pool on every
//! handshake so a tampered list never revokes (or un-revokes) anyone.

use crate::revocation::{CrlSnapshot, RevocationCache};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use x509_parser::prelude::*;

/// Serials already seen revoked, so repeat offenders skip the linear scan.
/// Never holds a non-revoked serial; cleared when the CRL is replaced.
struct RevokedMemo {
    generation: u64,
    serials: HashSet<Vec<u8>>,
}

pub struct RevokedPeerVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    issuers: Vec<CertificateDer<'static>>,
    revocation: Arc<RevocationCache>,
    memo: Mutex<RevokedMemo>,
}

impl RevokedPeerVerifier {
    pub fn new(
        inner: Arc<dyn ClientCertVerifier>,
        issuers: Vec<CertificateDer<'static>>,
        revocation: Arc<RevocationCache>,
    ) -> Self {
        Self {
            inner,
            issuers,
            revocation,
            memo: Mutex::new(RevokedMemo {
                generation: 0,
                serials: HashSet::new(),
            }),
        }
    }

    /// Check every raw peer certificate against the given revocation list
    pub(crate) fn check_revocation(
        &self,
        snapshot: &CrlSnapshot,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Result<(), rustls::Error> {
        let (_, crl) = parse_x509_crl(&snapshot.der)
            .map_err(|e| rustls::Error::General(format!("failed to parse cached crl: {e}")))?;

        // Match the CRL against the issuer whose key signed it.
        let mut matched = false;
        let mut last_err: Option<X509Error> = None;
        for issuer_der in &self.issuers {
            let Ok((_, issuer)) = parse_x509_certificate(issuer_der) else {
                continue;
            };
            match crl.verify_signature(issuer.public_key()) {
                Ok(()) => {
                    matched = true;
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        if !matched {
            return Err(rustls::Error::General(format!(
                "failed to match a certificate from the trusted pool with the CRL: {}",
                last_err.map_or_else(|| "no issuers".to_string(), |e| e.to_string())
            )));
        }

        let mut memo = self.memo.lock().expect("revoked memo lock poisoned");
        if memo.generation != snapshot.generation {
            memo.serials.clear();
            memo.generation = snapshot.generation;
        }

        for raw in std::iter::once(end_entity).chain(intermediates.iter()) {
            let (_, peer) = parse_x509_certificate(raw).map_err(|_| {
                rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
            })?;
            let serial = peer.raw_serial();

            if memo.serials.contains(serial) {
                return Err(rustls::Error::InvalidCertificate(CertificateError::Revoked));
            }

            if snapshot.is_revoked(serial) {
                memo.serials.insert(serial.to_vec());
                tracing::warn!(
                    subject = %peer.subject(),
                    issuer = %peer.issuer(),
                    "Peer certificate is revoked"
                );
                return Err(rustls::Error::InvalidCertificate(CertificateError::Revoked));
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for RevokedPeerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevokedPeerVerifier")
            .field("issuers", &self.issuers.len())
            .finish()
    }
}

impl ClientCertVerifier for RevokedPeerVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let verified = self.inner.verify_client_cert(end_entity, intermediates, now)?;
        let snapshot = self.revocation.current();
        self.check_revocation(&snapshot, end_entity, intermediates)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
