//! Error taxonomy for the streaming core.
//!
//! Every fallible operation in the crate returns [`StreamError`]. The type is
//! cheap to clone so the same value can be stored in
//! [`ConnectionState::Faulted`](crate::state::ConnectionState) and sent to
//! observers on the signal channel.

use thiserror::Error;

/// Broad classes of failure, used by hosts to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller mistake. Fails synchronously and is never retried.
    Configuration,
    /// The affected handle or operation is unusable and must be recreated.
    Resource,
    /// Scoped to a single stream; other connections are unaffected.
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    // ── Configuration ────────────────────────────────────────────
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("dimension mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("configuration error: {0}")]
    Config(String),

    // ── Resource ─────────────────────────────────────────────────
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("codec handle already disposed")]
    HandleDisposed,

    /// The encoded image did not fit; recreate the codec with a larger buffer.
    #[error("encoded frame needs {needed} bytes but the output buffer holds {max}")]
    OutputBufferTooSmall { needed: usize, max: usize },

    // ── Stream ───────────────────────────────────────────────────
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: usize },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("stream degraded after {consecutive_failures} consecutive decode failures")]
    StreamDegraded { consecutive_failures: u32 },

    #[error("render surface error: {0}")]
    Surface(String),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::InvalidParameters(_)
            | StreamError::DimensionMismatch { .. }
            | StreamError::Config(_) => ErrorKind::Configuration,
            StreamError::ResourceExhausted(_)
            | StreamError::HandleDisposed
            | StreamError::OutputBufferTooSmall { .. }
            | StreamError::Surface(_) => ErrorKind::Resource,
            StreamError::MalformedFrame(_)
            | StreamError::FrameTooLarge { .. }
            | StreamError::ConnectionLost(_)
            | StreamError::StreamDegraded { .. } => ErrorKind::Stream,
        }
    }

    /// Whether this error ends the stream it occurred on.
    ///
    /// A malformed frame or a degraded signal leaves the stream running.
    pub fn terminates_stream(&self) -> bool {
        !matches!(
            self,
            StreamError::MalformedFrame(_) | StreamError::StreamDegraded { .. }
        )
    }
}

// Every I/O failure on the stream is treated as a lost connection.
impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::ConnectionLost(e.to_string())
    }
}

impl From<config::ConfigError> for StreamError {
    fn from(e: config::ConfigError) -> Self {
        StreamError::Config(e.to_string())
    }
}

impl From<std::collections::TryReserveError> for StreamError {
    fn from(e: std::collections::TryReserveError) -> Self {
        StreamError::ResourceExhausted(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            StreamError::InvalidParameters("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(StreamError::HandleDisposed.kind(), ErrorKind::Resource);
        assert_eq!(
            StreamError::FrameTooLarge { size: 1 << 31, max: 1024 }.kind(),
            ErrorKind::Stream
        );
    }

    #[test]
    fn io_error_is_connection_lost() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let e: StreamError = io.into();
        assert!(matches!(e, StreamError::ConnectionLost(ref m) if m.contains("reset")));
        assert!(e.terminates_stream());
    }

    #[test]
    fn malformed_frame_does_not_terminate() {
        assert!(!StreamError::MalformedFrame("bad marker".into()).terminates_stream());
        assert!(!StreamError::StreamDegraded { consecutive_failures: 5 }.terminates_stream());
    }

    #[test]
    fn display_mentions_sizes() {
        let e = StreamError::FrameTooLarge { size: 2_147_483_648, max: 16 };
        let text = e.to_string();
        assert!(text.contains("2147483648"));
        assert!(text.contains("16"));
    }
}
