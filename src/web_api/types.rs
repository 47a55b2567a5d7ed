//! API request/response shapes

use crate::catalog::{CameraRecord, NewCamera};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default page size for `/camera/list`
pub const DEFAULT_LIST_LIMIT: u64 = 10;

#[derive(Debug, Deserialize)]
pub struct ListCamerasRequest {
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Serialize)]
pub struct ListCamerasResponse {
    pub cameras: Vec<CameraRecord>,
}

#[derive(Debug, Deserialize)]
pub struct AddCameraRequest {
    pub camera: NewCamera,
}

#[derive(Debug, Deserialize)]
pub struct RemoveCameraRequest {
    pub camera: RemoveCameraTarget,
}

#[derive(Debug, Deserialize)]
pub struct RemoveCameraTarget {
    #[serde(default)]
    pub ip: String,
}

/// Body for both `/camera/snap` and `/camera/subscribe`
#[derive(Debug, Deserialize)]
pub struct SnapCamerasRequest {
    #[serde(default)]
    pub ip: Option<String>,
}

/// One camera's latest frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraFrame {
    pub name: String,
    /// JPEG bytes, base64 on the wire
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Frames keyed by camera IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamerasResponse {
    pub cameras: HashMap<String, CameraFrame>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
