//! Render targets for decoded frames

use std::path::Path;

use crate::error::StreamError;
use crate::frame::{DecodedFrame, PixelBuffer, PixelFormat};

/// Anything a decoded frame can be painted onto.
///
/// Called on the host's render thread, once per tick that has a frame.
pub trait RenderSurface {
    fn present(&mut self, frame: &DecodedFrame) -> Result<(), StreamError>;
}

impl<F> RenderSurface for F
where
    F: FnMut(&DecodedFrame) -> Result<(), StreamError>,
{
    fn present(&mut self, frame: &DecodedFrame) -> Result<(), StreamError> {
        self(frame)
    }
}

/// Off-screen RGBA framebuffer of a fixed size.
///
/// Frames are scaled to fit with nearest-neighbour sampling.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    presented: u64,
    last_sequence: Option<u64>,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: vec![0; PixelBuffer::byte_len(width, height, PixelFormat::Rgba32)],
            presented: 0,
            last_sequence: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// RGBA bytes at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.rgba.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Write the current contents as an image; the format follows the
    /// file extension.
    pub fn save(&self, path: &Path) -> Result<(), StreamError> {
        let image = image::RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
            .ok_or_else(|| StreamError::Surface("framebuffer size mismatch".into()))?;
        image
            .save(path)
            .map_err(|e| StreamError::Surface(format!("save {}: {e}", path.display())))
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.rgba = vec![0; PixelBuffer::byte_len(width, height, PixelFormat::Rgba32)];
    }
}

impl RenderSurface for MemorySurface {
    fn present(&mut self, frame: &DecodedFrame) -> Result<(), StreamError> {
        blit_rgba(&frame.pixels, &mut self.rgba, self.width, self.height)?;
        self.presented += 1;
        self.last_sequence = Some(frame.sequence);
        Ok(())
    }
}

/// Scale `src` into a `dst_width` x `dst_height` RGBA buffer.
pub fn blit_rgba(
    src: &PixelBuffer,
    dst: &mut [u8],
    dst_width: u32,
    dst_height: u32,
) -> Result<(), StreamError> {
    let needed = PixelBuffer::byte_len(dst_width, dst_height, PixelFormat::Rgba32);
    if dst.len() != needed {
        return Err(StreamError::Surface(format!(
            "target holds {} bytes, {dst_width}x{dst_height} RGBA needs {needed}",
            dst.len()
        )));
    }
    let src_len = PixelBuffer::byte_len(src.width, src.height, src.format);
    if src.data.len() != src_len {
        return Err(StreamError::Surface(format!(
            "source holds {} bytes, {}x{} {:?} needs {src_len}",
            src.data.len(),
            src.width,
            src.height,
            src.format
        )));
    }
    if src.width == 0 || src.height == 0 || needed == 0 {
        return Ok(());
    }

    let bpp = src.format.bytes_per_pixel();
    let stride = src.stride();
    let same_size = src.width == dst_width && src.height == dst_height;

    for (y, row) in dst.chunks_exact_mut(dst_width as usize * 4).enumerate() {
        let sy = if same_size {
            y
        } else {
            y * src.height as usize / dst_height as usize
        };
        let src_row = &src.data[sy * stride..(sy + 1) * stride];

        for (x, out) in row.chunks_exact_mut(4).enumerate() {
            let sx = if same_size {
                x
            } else {
                x * src.width as usize / dst_width as usize
            };
            let px = &src_row[sx * bpp..sx * bpp + bpp];
            out[..3].copy_from_slice(&px[..3]);
            out[3] = if bpp == 4 { px[3] } else { 255 };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::gradient_frame;
    use std::time::Instant;

    fn decoded(sequence: u64, pixels: PixelBuffer) -> DecodedFrame {
        DecodedFrame {
            sequence,
            pixels,
            received_at: Instant::now(),
            decoded_at: Instant::now(),
        }
    }

    #[test]
    fn same_size_copy_adds_alpha() {
        let src = gradient_frame(4, 3, 0);
        let mut surface = MemorySurface::new(4, 3);
        surface.present(&decoded(1, src.clone())).unwrap();

        for y in 0..3 {
            for x in 0..4 {
                let rgb = src.pixel(x, y).unwrap();
                assert_eq!(surface.pixel(x, y).unwrap(), [rgb[0], rgb[1], rgb[2], 255]);
            }
        }
        assert_eq!(surface.last_sequence(), Some(1));
    }

    #[test]
    fn upscale_repeats_nearest_pixel() {
        let src = PixelBuffer::new(
            2,
            1,
            PixelFormat::Rgb24,
            vec![10, 20, 30, 200, 210, 220],
        )
        .unwrap();
        let mut surface = MemorySurface::new(4, 2);
        surface.present(&decoded(7, src)).unwrap();

        assert_eq!(surface.pixel(0, 0), Some([10, 20, 30, 255]));
        assert_eq!(surface.pixel(1, 1), Some([10, 20, 30, 255]));
        assert_eq!(surface.pixel(2, 0), Some([200, 210, 220, 255]));
        assert_eq!(surface.pixel(3, 1), Some([200, 210, 220, 255]));
    }

    #[test]
    fn downscale_samples_source() {
        let src = gradient_frame(64, 48, 0);
        let mut surface = MemorySurface::new(16, 12);
        surface.present(&decoded(2, src.clone())).unwrap();

        let rgb = src.pixel(60, 44).unwrap();
        assert_eq!(surface.pixel(15, 11).unwrap()[..3], rgb[..]);
        assert_eq!(surface.frames_presented(), 1);
    }

    #[test]
    fn rgba_source_keeps_alpha() {
        let src = PixelBuffer::new(1, 1, PixelFormat::Rgba32, vec![1, 2, 3, 4]).unwrap();
        let mut dst = vec![0; 4];
        blit_rgba(&src, &mut dst, 1, 1).unwrap();
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn wrong_target_size_is_surface_error() {
        let src = gradient_frame(2, 2, 0);
        let mut dst = vec![0; 3];
        assert!(matches!(
            blit_rgba(&src, &mut dst, 2, 2),
            Err(StreamError::Surface(_))
        ));
    }

    #[test]
    fn saved_png_matches_framebuffer() {
        let mut surface = MemorySurface::new(8, 6);
        surface.present(&decoded(1, gradient_frame(8, 6, 0))).unwrap();

        let path = std::env::temp_dir().join(format!("framecast-snapshot-{}.png", std::process::id()));
        surface.save(&path).unwrap();
        let loaded = image::open(&path).unwrap().into_rgba8();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.dimensions(), (8, 6));
        assert_eq!(loaded.as_raw().as_slice(), surface.rgba());
    }

    #[test]
    fn closures_are_surfaces() {
        let mut seen = Vec::new();
        let mut surface = |frame: &DecodedFrame| {
            seen.push(frame.sequence);
            Ok::<(), StreamError>(())
        };
        surface.present(&decoded(3, gradient_frame(2, 2, 0))).unwrap();
        surface.present(&decoded(4, gradient_frame(2, 2, 0))).unwrap();
        assert_eq!(seen, vec![3, 4]);
    }

    #[test]
    fn short_source_buffer_is_a_surface_error() {
        let short = PixelBuffer {
            width: 32,
            height: 32,
            format: PixelFormat::Rgb24,
            data: vec![0; 10].into(),
        };
        let mut surface = MemorySurface::new(16, 16);
        assert!(matches!(
            surface.present(&decoded(1, short.clone())),
            Err(StreamError::Surface(_))
        ));
        assert_eq!(surface.frames_presented(), 0);

        let mut rgba = vec![0; 32 * 32 * 4];
        assert!(matches!(
            blit_rgba(&short, &mut rgba, 32, 32),
            Err(StreamError::Surface(_))
        ));
    }
}
