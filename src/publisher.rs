//! Frame source side of the protocol.
//!
//! Accepts a viewer's channel handshake and pushes length-prefixed JPEG
//! records at it. Used by the `framecast-feed` binary and by tests that
//! need a real peer.

use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, instrument};

use crate::codec::CodecHandle;
use crate::error::StreamError;
use crate::frame::PixelBuffer;
use crate::stream::{read_handshake, FrameCodec};
use crate::StreamConfig;

pub struct StreamPublisher<S> {
    sink: FramedWrite<S, FrameCodec>,
    channel: String,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<S> StreamPublisher<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wait for the viewer's handshake, bounded by the connect timeout.
    #[instrument(skip_all)]
    pub async fn accept(mut stream: S, config: &StreamConfig) -> Result<Self, StreamError> {
        let limit = Duration::from_millis(config.connect_timeout_ms);
        let channel = tokio::time::timeout(limit, read_handshake(&mut stream))
            .await
            .map_err(|_| StreamError::ConnectionLost(format!("no handshake within {limit:?}")))??;
        info!("Viewer subscribed to channel {}", channel);
        Ok(Self::new(stream, channel, config.max_frame_bytes))
    }
}

impl<S> StreamPublisher<S>
where
    S: AsyncWrite + Unpin,
{
    pub fn new(stream: S, channel: String, max_frame_bytes: usize) -> Self {
        Self {
            sink: FramedWrite::new(stream, FrameCodec::new(max_frame_bytes)),
            channel,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Send one already-encoded JPEG. Waits while the viewer is not reading.
    pub async fn send_frame(&mut self, jpeg: Bytes) -> Result<(), StreamError> {
        let len = jpeg.len();
        self.sink.send(jpeg).await?;
        self.frames_sent += 1;
        self.bytes_sent += len as u64;
        Ok(())
    }

    /// Encode `pixels` with `codec` and send the result.
    pub async fn send_pixels(
        &mut self,
        codec: &mut CodecHandle,
        pixels: &PixelBuffer,
    ) -> Result<usize, StreamError> {
        let jpeg = codec.encode(pixels)?;
        let len = jpeg.len();
        self.send_frame(jpeg).await?;
        Ok(len)
    }

    /// Flush and shut the write half down.
    pub async fn close(mut self) -> Result<(), StreamError> {
        self.sink.close().await?;
        debug!(
            "Publisher for {} closed after {} frames ({} bytes)",
            self.channel, self.frames_sent, self.bytes_sent
        );
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.sink.into_inner()
    }
}
