//! Catalog data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Camera entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRecord {
    pub id: u64,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Frame crop adjustment; a default one is created with each camera
    pub adjustment: Option<CameraAdjustment>,
}

/// Frame crop adjustment for a camera
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraAdjustment {
    pub crop_x: u64,
    pub crop_y: u64,
    pub crop_w: f64,
    pub crop_h: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for creating a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCamera {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

impl NewCamera {
    /// Validate the required fields before any catalog write.
    pub fn validate(&self) -> Result<()> {
        if self.ip.parse::<std::net::IpAddr>().is_err() {
            return Err(Error::Validation(format!("invalid ip entry '{}'", self.ip)));
        }
        if self.port == 0 {
            return Err(Error::Validation(format!(
                "invalid port entry '{}'",
                self.port
            )));
        }
        if self.name.is_empty() {
            return Err(Error::Validation("invalid empty name entry".to_string()));
        }
        Ok(())
    }
}
