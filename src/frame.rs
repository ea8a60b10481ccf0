use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
        }
    }
}

/// Tightly packed, row-major pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Immutable pixel data - can be shared across threads without copying
    pub data: Bytes,
}

impl PixelBuffer {
    /// Wrap `data`, checking it holds exactly `width * height` pixels.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, StreamError> {
        let data = data.into();
        let expected = Self::byte_len(width, height, format);
        if data.len() != expected {
            return Err(StreamError::InvalidParameters(format!(
                "pixel buffer holds {} bytes, {width}x{height} {format:?} needs {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn byte_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Returns the pixel bytes at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride() + x as usize * bpp;
        self.data.get(offset..offset + bpp)
    }
}

/// One JPEG image as it arrived on the wire.
#[derive(Debug, Clone)]
pub struct CompressedFrame {
    /// Position of this frame on its connection, starting at 1.
    pub sequence: u64,
    pub data: Bytes,
    pub received_at: Instant,
}

impl CompressedFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A frame ready for display.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Sequence of the compressed frame this was decoded from.
    pub sequence: u64,
    pub pixels: PixelBuffer,
    pub received_at: Instant,
    pub decoded_at: Instant,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.pixels.width
    }

    pub fn height(&self) -> u32 {
        self.pixels.height
    }
}
