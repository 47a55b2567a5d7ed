//! WebAPI - REST API endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting, including the multipart subscription stream

mod multipart;
mod routes;
mod types;

pub use multipart::MultipartWriter;
pub use routes::create_router;
pub use types::{CameraFrame, CamerasResponse};
