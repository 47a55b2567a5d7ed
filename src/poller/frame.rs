//! Upstream frame assembly
//!
//! Camera streams push a bare concatenation of encoded images. The
//! assembler buffers incoming chunks and carves complete frames out of
//! them; the codec re-encodes whatever the decoder recognizes into JPEG.

use bytes::{Bytes, BytesMut};

/// Upper bound on buffered upstream bytes without a complete frame
pub const MAX_FRAME_BUFFER_BYTES: usize = 5 * 1024 * 1024;

const JPEG_SOI: &[u8] = &[0xff, 0xd8, 0xff];
const JPEG_EOI: &[u8] = &[0xff, 0xd9];
const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
const PNG_IEND: &[u8] = &[0x49, 0x45, 0x4e, 0x44];

/// Buffers upstream chunks and yields complete image frames
pub struct FrameAssembler {
    buf: BytesMut,
    cap: usize,
}

impl FrameAssembler {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            cap,
        }
    }

    /// Append a chunk read from the upstream body
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.cap {
            tracing::warn!(
                buffered = self.buf.len(),
                cap = self.cap,
                "Frame buffer overflow, discarding buffered bytes"
            );
            self.buf.clear();
        }
    }

    /// Carve the next complete frame out of the buffer.
    /// Bytes preceding a recognized image signature are discarded.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let jpeg_start = find(&self.buf, JPEG_SOI);
        let png_start = find(&self.buf, PNG_SIGNATURE);

        let (start, end) = match (jpeg_start, png_start) {
            (Some(j), p) if p.map_or(true, |p| j <= p) => {
                let eoi = find(&self.buf[j + JPEG_SOI.len()..], JPEG_EOI)?;
                (j, j + JPEG_SOI.len() + eoi + JPEG_EOI.len())
            }
            (Some(j), None) => {
                let eoi = find(&self.buf[j + JPEG_SOI.len()..], JPEG_EOI)?;
                (j, j + JPEG_SOI.len() + eoi + JPEG_EOI.len())
            }
            (_, Some(p)) => {
                // IEND chunk body is empty: 4 type bytes then a 4-byte CRC.
                let iend = find(&self.buf[p + PNG_SIGNATURE.len()..], PNG_IEND)?;
                (p, p + PNG_SIGNATURE.len() + iend + PNG_IEND.len() + 4)
            }
            (None, None) => return None,
        };

        if end > self.buf.len() {
            return None;
        }

        let _ = self.buf.split_to(start);
        Some(self.buf.split_to(end - start).freeze())
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Decode a frame (format auto-detected) and re-encode it as JPEG at
/// default quality. The output is always a self-consistent JPEG image.
pub fn reencode_jpeg(frame: &[u8]) -> image::ImageResult<Vec<u8>> {
    let img = image::load_from_memory(frame)?;
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)?;
    Ok(out)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
