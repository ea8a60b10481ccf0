//! Construction parameters shared by both codec roles.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// JPEG cannot describe images wider or taller than this.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Smallest output budget any encoder is allowed to run with.
const MIN_DEFAULT_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParameters {
    pub width: u32,
    pub height: u32,
    /// 1..=100
    pub quality: u8,
    pub max_output_bytes: usize,
}

impl CodecParameters {
    pub fn new(width: u32, height: u32, quality: u8, max_output_bytes: usize) -> Self {
        Self {
            width,
            height,
            quality,
            max_output_bytes,
        }
    }

    /// Parameters with a generous output budget for the given size.
    pub fn with_default_budget(width: u32, height: u32, quality: u8) -> Self {
        Self::new(width, height, quality, default_output_bytes(width, height))
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.width == 0 || self.height == 0 {
            return Err(StreamError::InvalidParameters(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(StreamError::InvalidParameters(format!(
                "{}x{} exceeds the JPEG limit of {MAX_DIMENSION} per side",
                self.width, self.height
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(StreamError::InvalidParameters(format!(
                "quality must be within 1..=100, got {}",
                self.quality
            )));
        }
        let min = min_output_bytes(self.width, self.height);
        if self.max_output_bytes < min {
            return Err(StreamError::InvalidParameters(format!(
                "max_output_bytes {} is below the {min} bytes required for {}x{}",
                self.max_output_bytes, self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Size of a 4:2:0 YUV frame, the floor for any compressed frame budget.
pub fn min_output_bytes(width: u32, height: u32) -> usize {
    let pixels = width as usize * height as usize;
    pixels + pixels.div_ceil(2)
}

pub fn default_output_bytes(width: u32, height: u32) -> usize {
    (width as usize * height as usize * 3).max(MIN_DEFAULT_OUTPUT_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_is_one_and_a_half_bytes_per_pixel() {
        assert_eq!(min_output_bytes(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(min_output_bytes(1, 1), 2);
    }

    #[test]
    fn accepts_valid_parameters() {
        CodecParameters::with_default_budget(640, 480, 85)
            .validate()
            .unwrap();
        CodecParameters::new(8, 8, 1, 96).validate().unwrap();
    }

    #[test]
    fn rejects_bad_parameters() {
        let cases = [
            CodecParameters::new(0, 480, 80, 1 << 20),
            CodecParameters::new(640, 0, 80, 1 << 20),
            CodecParameters::new(640, 480, 0, 1 << 20),
            CodecParameters::new(640, 480, 101, 1 << 20),
            CodecParameters::new(640, 480, 80, 640 * 480),
            CodecParameters::new(70_000, 10, 80, 1 << 24),
        ];
        for params in cases {
            let err = params.validate().unwrap_err();
            assert!(
                matches!(err, StreamError::InvalidParameters(_)),
                "{params:?} -> {err:?}"
            );
        }
    }
}
