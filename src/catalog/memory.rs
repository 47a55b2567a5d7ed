//! In-memory catalog
//!
//! Used when no database URL is configured, and by tests. State resets on
//! process restart.

use super::{CameraAdjustment, CameraCatalog, CameraRecord, NewCamera};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Catalog backed by a process-local map keyed by camera IP
pub struct MemoryCatalog {
    cameras: RwLock<HashMap<String, CameraRecord>>,
    next_id: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            cameras: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraCatalog for MemoryCatalog {
    async fn roster(&self, limit: Option<u64>) -> Result<Vec<CameraRecord>> {
        let cameras = self.cameras.read().await;
        let mut roster: Vec<CameraRecord> = cameras.values().cloned().collect();
        // Stable order for pagination and deterministic reconciliation logs.
        roster.sort_by_key(|c| c.id);
        if let Some(limit) = limit {
            roster.truncate(limit as usize);
        }
        Ok(roster)
    }

    async fn insert(&self, camera: NewCamera) -> Result<CameraRecord> {
        camera.validate()?;

        let mut cameras = self.cameras.write().await;
        if cameras.contains_key(&camera.ip) {
            return Err(Error::Conflict(format!(
                "camera entry with IP '{}' already exists",
                camera.ip
            )));
        }

        let now = Utc::now();
        let record = CameraRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: camera.name,
            ip: camera.ip.clone(),
            port: camera.port,
            created_at: now,
            modified_at: now,
            adjustment: Some(CameraAdjustment {
                updated_at: Some(now),
                ..CameraAdjustment::default()
            }),
        };
        cameras.insert(camera.ip, record.clone());
        Ok(record)
    }

    async fn remove(&self, ip: &str) -> Result<()> {
        let mut cameras = self.cameras.write().await;
        if cameras.remove(ip).is_none() {
            return Err(Error::NotFound(format!(
                "camera entry with IP '{}' not found",
                ip
            )));
        }
        Ok(())
    }
}
