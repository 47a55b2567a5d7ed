//! Certificate revocation cache
//!
//! ## Responsibilities
//!
//! - Load the CA's certificate revocation list (PEM or DER) at startup
//! - Hot-reload it when the underlying file changes
//! - Hand out immutable snapshots to the TLS peer verifier
//!
//! Readers always observe either the snapshot present at startup or a
//! complete later replacement. A failed reload keeps the previous snapshot.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use x509_parser::prelude::*;

/// Poll interval for the CRL file watcher
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Immutable view of a loaded revocation list
pub struct CrlSnapshot {
    /// Raw DER bytes, re-parsed by the verifier for signature checks
    pub der: Vec<u8>,
    /// Revoked serials, raw DER integer bytes
    pub revoked_serials: Vec<Vec<u8>>,
    /// Bumped on every successful reload; lets the verifier reset its
    /// revoked-serial memo when the list is replaced
    pub generation: u64,
}

impl CrlSnapshot {
    /// Linear scan of the revoked entries
    pub fn is_revoked(&self, raw_serial: &[u8]) -> bool {
        self.revoked_serials.iter().any(|s| s == raw_serial)
    }
}

/// Process-wide revocation list cache
pub struct RevocationCache {
    path: PathBuf,
    current: RwLock<Arc<CrlSnapshot>>,
}

impl RevocationCache {
    /// Load the CRL from `path`. An unreadable or unparsable file here is
    /// fatal; only mid-run reload failures are tolerated.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path, 0).await?;
        tracing::info!(
            path = %path.display(),
            revoked = snapshot.revoked_serials.len(),
            "Loaded CA certificate revocation list"
        );
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<CrlSnapshot> {
        self.current.read().expect("crl lock poisoned").clone()
    }

    /// Re-read and re-parse the file, replacing the snapshot atomically
    pub async fn reload(&self) -> Result<()> {
        let next_generation = self.current().generation + 1;
        let snapshot = read_snapshot(&self.path, next_generation).await?;
        let revoked = snapshot.revoked_serials.len();

        let mut current = self.current.write().expect("crl lock poisoned");
        *current = Arc::new(snapshot);

        tracing::info!(
            path = %self.path.display(),
            revoked = revoked,
            generation = next_generation,
            "CA certificate revocation list updated"
        );
        Ok(())
    }

    /// Watch the CRL file for `(size, mtime)` changes, reloading on each.
    /// Intended to run in its own task; terminates on cancellation.
    pub async fn watch(self: Arc<Self>, cancel: CancellationToken) {
        let mut last_stat = stat(&self.path).await;
        let mut tick = tokio::time::interval(WATCH_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Revocation watcher terminating");
                    return;
                }
                _ = tick.tick() => {
                    let stat_now = stat(&self.path).await;
                    if stat_now != last_stat {
                        last_stat = stat_now;
                        if let Err(e) = self.reload().await {
                            tracing::warn!(
                                path = %self.path.display(),
                                error = %e,
                                "CRL reload failed, keeping previous list"
                            );
                        }
                    }
                }
            }
        }
    }
}

async fn stat(path: &Path) -> Option<(u64, SystemTime)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

async fn read_snapshot(path: &Path, generation: u64) -> Result<CrlSnapshot> {
    let raw = tokio::fs::read(path).await?;
    let der = decode_crl_bytes(&raw)?;

    let (_, crl) = parse_x509_crl(&der)
        .map_err(|e| Error::Tls(format!("failed to parse crl '{}': {e}", path.display())))?;

    let revoked_serials = crl
        .iter_revoked_certificates()
        .map(|rc| rc.raw_serial().to_vec())
        .collect();

    Ok(CrlSnapshot {
        der,
        revoked_serials,
        generation,
    })
}

/// Accept either a PEM-wrapped or a raw DER revocation list
fn decode_crl_bytes(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.starts_with(b"-----BEGIN") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(raw)
            .map_err(|e| Error::Tls(format!("failed to decode crl pem: {e}")))?;
        Ok(pem.contents)
    } else {
        Ok(raw.to_vec())
    }
}
