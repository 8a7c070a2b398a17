//! Decoded video frames and the sink that receives them

use crate::{Error, Result};
use bytes::Bytes;

/// Bytes per BGRA pixel
pub const BGRA_BYTES_PER_PIXEL: usize = 4;

/// A decoded video frame in BGRA order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// `width * height * 4` bytes, rows top to bottom
    pub data: Bytes,
}

impl VideoFrame {
    /// Wrap a BGRA buffer, checking its length against the dimensions
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = width as usize * height as usize * BGRA_BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(Error::MediaError(format!(
                "BGRA frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A black frame of the given size
    pub fn black(width: u32, height: u32) -> Self {
        let mut pixels = vec![0u8; width as usize * height as usize * BGRA_BYTES_PER_PIXEL];
        for alpha in pixels.iter_mut().skip(3).step_by(BGRA_BYTES_PER_PIXEL) {
            *alpha = u8::MAX;
        }
        Self {
            width,
            height,
            data: Bytes::from(pixels),
        }
    }
}

/// Receives one call per decoded frame
///
/// Called from the track reader task; implementations hand the frame off to
/// their own render context.
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

impl<F> VideoSink for F
where
    F: Fn(&VideoFrame) + Send + Sync,
{
    fn on_frame(&self, frame: &VideoFrame) {
        self(frame)
    }
}
