//! Multipart stream framing for `/camera/subscribe`
//!
//! The subscription response is a `multipart/form-data` body: one JSON part
//! per tick, each with an explicit `Content-Length` so clients can frame
//! parts without buffering the whole stream.

use bytes::{BufMut, Bytes, BytesMut};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Boundary length, matching the common stdlib writers
const BOUNDARY_LEN: usize = 30;

/// Writes multipart parts with a fixed boundary chosen at stream start
pub struct MultipartWriter {
    boundary: String,
}

impl MultipartWriter {
    pub fn new() -> Self {
        let boundary: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LEN)
            .map(char::from)
            .collect();
        Self { boundary }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the response `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Frame one JSON part
    pub fn part(&self, body: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(body.len() + self.boundary.len() + 80);
        out.put_slice(b"--");
        out.put_slice(self.boundary.as_bytes());
        out.put_slice(b"\r\nContent-Type: application/json\r\n");
        out.put_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        out.put_slice(body);
        out.put_slice(b"\r\n");
        out.freeze()
    }

    /// Closing delimiter
    pub fn terminator(&self) -> Bytes {
        Bytes::from(format!("--{}--\r\n", self.boundary))
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}
