//! Owned JPEG encoder/decoder contexts.
//!
//! A [`CodecHandle`] is bound to one role and one set of
//! [`CodecParameters`] for its whole life. Its working buffers are
//! allocated up front by [`CodecFactory`](super::CodecFactory) and released
//! by [`CodecHandle::dispose`] (or on drop, whichever comes first).

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::debug;
use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::params::CodecParameters;
use crate::error::StreamError;
use crate::frame::{PixelBuffer, PixelFormat};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Number of codec contexts currently holding working buffers.
static LIVE_CONTEXTS: AtomicUsize = AtomicUsize::new(0);

/// Codec contexts alive in this process.
pub fn live_contexts() -> usize {
    LIVE_CONTEXTS.load(Ordering::Acquire)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    Encoder,
    Decoder,
}

struct EncoderContext {
    /// Reused for every frame; capacity is the output budget.
    output: Vec<u8>,
}

struct DecoderContext {
    options: DecoderOptions,
    /// Pre-allocated buffer for the next decoded frame.
    spare: Option<Vec<u8>>,
    frame_bytes: usize,
}

impl DecoderContext {
    fn take_output(&mut self) -> Result<Vec<u8>, StreamError> {
        if let Some(buf) = self.spare.take() {
            return Ok(buf);
        }
        zeroed(self.frame_bytes)
    }
}

enum ContextKind {
    Encoder(EncoderContext),
    Decoder(DecoderContext),
}

struct CodecContext {
    kind: ContextKind,
}

impl CodecContext {
    fn allocate(role: CodecRole, params: &CodecParameters) -> Result<Self, StreamError> {
        let kind = match role {
            CodecRole::Encoder => {
                let mut output = Vec::new();
                output.try_reserve_exact(params.max_output_bytes)?;
                ContextKind::Encoder(EncoderContext { output })
            }
            CodecRole::Decoder => {
                let frame_bytes = params.pixel_count() * PixelFormat::Rgb24.bytes_per_pixel();
                let options = DecoderOptions::default()
                    .jpeg_set_out_colorspace(ColorSpace::RGB)
                    .set_max_width(params.width as usize)
                    .set_max_height(params.height as usize);
                ContextKind::Decoder(DecoderContext {
                    options,
                    spare: Some(zeroed(frame_bytes)?),
                    frame_bytes,
                })
            }
        };
        LIVE_CONTEXTS.fetch_add(1, Ordering::AcqRel);
        Ok(Self { kind })
    }
}

impl Drop for CodecContext {
    fn drop(&mut self) {
        LIVE_CONTEXTS.fetch_sub(1, Ordering::AcqRel);
    }
}

fn zeroed(len: usize) -> Result<Vec<u8>, StreamError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Exclusively owned encoder or decoder.
///
/// Not `Clone`; moving it to another thread moves ownership with it.
pub struct CodecHandle {
    role: CodecRole,
    params: CodecParameters,
    context: Option<CodecContext>,
}

impl CodecHandle {
    /// Allocate a context. Parameters must already be validated.
    pub(crate) fn allocate(role: CodecRole, params: CodecParameters) -> Result<Self, StreamError> {
        let context = CodecContext::allocate(role, &params)?;
        debug!(
            ?role,
            width = params.width,
            height = params.height,
            quality = params.quality,
            "codec context allocated"
        );
        Ok(Self {
            role,
            params,
            context: Some(context),
        })
    }

    pub fn role(&self) -> CodecRole {
        self.role
    }

    pub fn params(&self) -> &CodecParameters {
        &self.params
    }

    pub fn is_disposed(&self) -> bool {
        self.context.is_none()
    }

    /// Release the codec context. Returns `false` if it was already released.
    pub fn dispose(&mut self) -> bool {
        match self.context.take() {
            Some(context) => {
                drop(context);
                debug!(role = ?self.role, "codec context released");
                true
            }
            None => false,
        }
    }

    /// Compress an RGB24 image of exactly the configured dimensions.
    pub fn encode(&mut self, pixels: &PixelBuffer) -> Result<Bytes, StreamError> {
        let params = self.params;
        let ctx = self.encoder_context()?;

        if pixels.width != params.width || pixels.height != params.height {
            return Err(StreamError::DimensionMismatch {
                expected_width: params.width,
                expected_height: params.height,
                width: pixels.width,
                height: pixels.height,
            });
        }
        if pixels.format != PixelFormat::Rgb24 {
            return Err(StreamError::InvalidParameters(format!(
                "encoder takes Rgb24 input, got {:?}",
                pixels.format
            )));
        }
        let expected = PixelBuffer::byte_len(pixels.width, pixels.height, pixels.format);
        if pixels.data.len() != expected {
            return Err(StreamError::InvalidParameters(format!(
                "pixel buffer holds {} bytes, {}x{} Rgb24 needs {expected}",
                pixels.data.len(),
                pixels.width,
                pixels.height
            )));
        }

        ctx.output.clear();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut ctx.output, params.quality);
            encoder
                .encode(
                    &pixels.data,
                    params.width,
                    params.height,
                    ExtendedColorType::Rgb8,
                )
                .map_err(|e| {
                    StreamError::InvalidParameters(format!("jpeg encoder rejected input: {e}"))
                })?;
        }

        let needed = ctx.output.len();
        if needed > params.max_output_bytes {
            ctx.output.clear();
            ctx.output.shrink_to(params.max_output_bytes);
            return Err(StreamError::OutputBufferTooSmall {
                needed,
                max: params.max_output_bytes,
            });
        }

        Ok(Bytes::copy_from_slice(&ctx.output))
    }

    /// Decompress one JPEG image into RGB24 pixels.
    pub fn decode(&mut self, data: &[u8]) -> Result<PixelBuffer, StreamError> {
        let params = self.params;
        let ctx = self.decoder_context()?;

        if data.get(..2) != Some(&JPEG_SOI[..]) {
            return Err(StreamError::MalformedFrame(format!(
                "missing start-of-image marker ({} bytes)",
                data.len()
            )));
        }

        let mut decoder = JpegDecoder::new_with_options(data, ctx.options.clone());
        decoder
            .decode_headers()
            .map_err(|e| StreamError::MalformedFrame(format!("{e:?}")))?;

        let (width, height) = decoder
            .dimensions()
            .ok_or_else(|| StreamError::MalformedFrame("no frame header".into()))?;
        if width != params.width as usize || height != params.height as usize {
            return Err(StreamError::MalformedFrame(format!(
                "embedded size {width}x{height} differs from configured {}x{}",
                params.width, params.height
            )));
        }

        let needed = decoder.output_buffer_size().unwrap_or(0);
        if needed != ctx.frame_bytes {
            return Err(StreamError::MalformedFrame(format!(
                "decoder wants {needed} output bytes, expected {}",
                ctx.frame_bytes
            )));
        }

        let mut out = ctx.take_output()?;
        decoder
            .decode_into(&mut out)
            .map_err(|e| StreamError::MalformedFrame(format!("{e:?}")))?;

        PixelBuffer::new(params.width, params.height, PixelFormat::Rgb24, out)
    }

    fn encoder_context(&mut self) -> Result<&mut EncoderContext, StreamError> {
        match self.context.as_mut().map(|c| &mut c.kind) {
            None => Err(StreamError::HandleDisposed),
            Some(ContextKind::Encoder(ctx)) => Ok(ctx),
            Some(ContextKind::Decoder(_)) => Err(StreamError::InvalidParameters(
                "decoder handle cannot encode".into(),
            )),
        }
    }

    fn decoder_context(&mut self) -> Result<&mut DecoderContext, StreamError> {
        match self.context.as_mut().map(|c| &mut c.kind) {
            None => Err(StreamError::HandleDisposed),
            Some(ContextKind::Decoder(ctx)) => Ok(ctx),
            Some(ContextKind::Encoder(_)) => Err(StreamError::InvalidParameters(
                "encoder handle cannot decode".into(),
            )),
        }
    }
}

impl Drop for CodecHandle {
    fn drop(&mut self) {
        if self.context.is_some() {
            debug!(role = ?self.role, "codec handle dropped without dispose");
        }
    }
}

impl std::fmt::Debug for CodecHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecHandle")
            .field("role", &self.role)
            .field("params", &self.params)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
