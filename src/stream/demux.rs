//! Length-delimited frame demuxer.
//!
//! ## Wire format
//!
//! ```text
//! length:   u32 big-endian (4)
//! payload:  [u8; length]    JPEG image
//! ```
//!
//! Records repeat for the lifetime of the connection. [`FrameCodec`] does the
//! byte-level reassembly for `tokio_util`'s framed I/O; [`FrameDemuxer`] wraps
//! a reader and numbers the complete frames it yields.

use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::frame::CompressedFrame;

pub const LENGTH_PREFIX_BYTES: usize = 4;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Codec for `[u32 length][payload]` records.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    /// Payload length of a record whose prefix was already consumed.
    pending: Option<usize>,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: None,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, StreamError> {
        let len = match self.pending {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_BYTES {
                    return Ok(None);
                }
                let declared = u64::from(src.get_u32());
                if declared > self.max_frame_bytes as u64 {
                    return Err(StreamError::FrameTooLarge {
                        size: declared,
                        max: self.max_frame_bytes,
                    });
                }
                let len = declared as usize;
                src.reserve(len.saturating_sub(src.len()));
                self.pending = Some(len);
                len
            }
        };

        if src.len() < len {
            return Ok(None);
        }
        self.pending = None;
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, StreamError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.pending.is_none() && src.is_empty() => Ok(None),
            None => Err(StreamError::ConnectionLost(format!(
                "stream closed mid-frame with {} bytes buffered",
                src.len()
            ))),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), StreamError> {
        if item.len() > self.max_frame_bytes || item.len() > u32::MAX as usize {
            return Err(StreamError::FrameTooLarge {
                size: item.len() as u64,
                max: self.max_frame_bytes,
            });
        }
        dst.reserve(LENGTH_PREFIX_BYTES + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Pulls complete frames off a byte stream.
///
/// Holds at most one partially received frame; reads only happen when the
/// caller asks for the next frame, so a slow consumer stalls the socket
/// instead of growing a queue.
pub struct FrameDemuxer<R> {
    frames: FramedRead<R, FrameCodec>,
    read_timeout: Option<Duration>,
    frames_read: u64,
    finished: bool,
}

impl<R: AsyncRead + Unpin> FrameDemuxer<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            frames: FramedRead::new(reader, FrameCodec::new(max_frame_bytes)),
            read_timeout: None,
            frames_read: 0,
            finished: false,
        }
    }

    /// Treat silence longer than `timeout` as a lost connection.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Next complete frame, `Ok(None)` once the peer closed cleanly.
    ///
    /// After an error or end of stream the demuxer stays finished.
    pub async fn next_frame(&mut self) -> Result<Option<CompressedFrame>, StreamError> {
        if self.finished {
            return Ok(None);
        }

        let next = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.frames.next())
                .await
                .map_err(|_| StreamError::ConnectionLost(format!("no data for {limit:?}")))?,
            None => self.frames.next().await,
        };

        match next {
            Some(Ok(data)) => {
                self.frames_read += 1;
                metrics::counter!("frames_received").increment(1);
                Ok(Some(CompressedFrame {
                    sequence: self.frames_read,
                    data,
                    received_at: Instant::now(),
                }))
            }
            Some(Err(e)) => {
                self.finished = true;
                warn!("Demuxer stopped after {} frames: {}", self.frames_read, e);
                Err(e)
            }
            None => {
                self.finished = true;
                debug!("Stream ended after {} frames", self.frames_read);
                Ok(None)
            }
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> R {
        self.frames.into_inner()
    }
}
