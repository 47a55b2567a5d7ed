//! camrelay - mutually-authenticated camera relay server
//!
//! Ingests live image streams from a dynamic fleet of IP cameras, keeps the
//! latest decoded frame per camera in memory, and re-exposes frames to
//! authenticated clients as single snapshots or continuous multipart
//! streams.
//!
//! ## Components
//!
//! 1. Catalog - camera roster persistence (MySQL or in-memory)
//! 2. Revocation - hot-reloaded certificate revocation list cache
//! 3. Tls - server identity, issuer pool, revocation-checking peer verifier
//! 4. Poller - per-camera poll workers plus the reconciling supervisor
//! 5. WebAPI - REST endpoints including the multipart subscription stream
//! 6. Server - TLS-terminating accept loop
//!
//! ## Design principles
//!
//! - Errors affecting one camera or one request never affect the others
//! - The supervisor is the single owner of the worker registry
//! - Cancellation is a token tree rooted at the process shutdown signal

pub mod catalog;
pub mod error;
pub mod poller;
pub mod revocation;
pub mod server;
pub mod state;
pub mod tls;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
