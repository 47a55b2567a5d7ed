//! Camera catalog gateway
//!
//! ## Responsibilities
//!
//! - Camera roster reads for the poll supervisor and the list endpoint
//! - Roster mutations from the add/remove endpoints
//!
//! The catalog is the single owner of camera persistence. The poll
//! supervisor never mutates it; mutations become visible to the worker set
//! on the next reconciliation tick.

mod memory;
mod mysql;
mod types;

pub use memory::MemoryCatalog;
pub use mysql::MySqlCatalog;
pub use types::{CameraAdjustment, CameraRecord, NewCamera};

use crate::error::Result;
use async_trait::async_trait;

/// Read/write interface over the camera roster.
///
/// Backed by MySQL in production and by an in-memory map in tests and
/// database-less deployments.
#[async_trait]
pub trait CameraCatalog: Send + Sync {
    /// Current roster, newest entries included, capped at `limit` when set.
    async fn roster(&self, limit: Option<u64>) -> Result<Vec<CameraRecord>>;

    /// Insert a new camera. Fails with `Error::Conflict` on duplicate IP.
    async fn insert(&self, camera: NewCamera) -> Result<CameraRecord>;

    /// Remove a camera by IP. Fails with `Error::NotFound` when absent.
    async fn remove(&self, ip: &str) -> Result<()>;
}
