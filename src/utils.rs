use tracing_subscriber::EnvFilter;

use crate::frame::{PixelBuffer, PixelFormat};

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime());

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = fmt
            .finish()
            .with(tracing_tracy::TracyLayer::default())
            .try_init();
    }
    #[cfg(not(feature = "profiling"))]
    let _ = fmt.try_init();
}

/// Smooth RGB test pattern. `phase` shifts the red channel so successive
/// frames differ.
pub fn gradient_frame(width: u32, height: u32, phase: u8) -> PixelBuffer {
    let span_x = width.max(2) - 1;
    let span_y = height.max(2) - 1;
    let mut data = Vec::with_capacity(PixelBuffer::byte_len(width, height, PixelFormat::Rgb24));

    for y in 0..height {
        let g = (y * 255 / span_y) as u8;
        for x in 0..width {
            let r = ((x * 255 / span_x) as u8).wrapping_add(phase);
            let b = ((x + y) * 255 / (span_x + span_y)) as u8;
            data.extend_from_slice(&[r, g, b]);
        }
    }

    PixelBuffer {
        width,
        height,
        format: PixelFormat::Rgb24,
        data: data.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_has_expected_shape() {
        let frame = gradient_frame(16, 9, 0);
        assert_eq!(frame.data.len(), 16 * 9 * 3);
        assert_eq!(frame.pixel(0, 0).unwrap(), &[0, 0, 0]);
        assert_eq!(frame.pixel(15, 8).unwrap(), &[255, 255, 255]);
    }

    #[test]
    fn phase_changes_content() {
        assert_ne!(gradient_frame(8, 8, 0).data, gradient_frame(8, 8, 40).data);
    }

    #[test]
    fn degenerate_sizes() {
        assert_eq!(gradient_frame(1, 1, 7).data.len(), 3);
        assert!(gradient_frame(0, 4, 0).data.is_empty());
    }
}
