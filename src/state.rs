//! Application state
//!
//! Holds configuration and all shared components

use crate::catalog::CameraCatalog;
use crate::poller::PollerSupervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Path to the server certificate (PEM)
    pub server_cert: PathBuf,
    /// Path to the server private key (PEM)
    pub server_key: PathBuf,
    /// Directory of trusted CA certificates; every file is added to the pool
    pub trusted_ca_dir: PathBuf,
    /// Path to the CA's certificate revocation list.
    /// Unset disables revocation checking (client certs are still required).
    pub ca_crl: Option<PathBuf>,
    /// Catalog database URL; unset falls back to the in-memory catalog
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            server_cert: std::env::var("SERVER_CERT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/etc/camrelay/server.crt")),
            server_key: std::env::var("SERVER_KEY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/etc/camrelay/server.key")),
            trusted_ca_dir: std::env::var("TRUSTED_CA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/etc/camrelay/trusted")),
            ca_crl: std::env::var("CA_CRL").ok().map(PathBuf::from),
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Camera catalog gateway
    pub catalog: Arc<dyn CameraCatalog>,
    /// Poll worker supervisor
    pub poller: Arc<PollerSupervisor>,
    /// Process-wide shutdown token
    pub shutdown: CancellationToken,
}
