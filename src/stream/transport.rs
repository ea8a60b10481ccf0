//! Outbound TCP connection to a frame source.
//!
//! ## Handshake
//!
//! Sent once by the client, immediately after the socket connects:
//!
//! ```text
//! length:   u16 big-endian (2)
//! channel:  [u8; length]    UTF-8, 1..=1024 bytes
//! ```
//!
//! The source replies with nothing; it starts pushing frame records right
//! away (see [`demux`](super::demux)).

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use super::demux::FrameDemuxer;
use super::endpoint::{validate_channel, Endpoint, MAX_CHANNEL_LEN};
use crate::error::StreamError;
use crate::StreamConfig;

/// Write the channel handshake.
pub async fn write_handshake<W>(writer: &mut W, channel: &str) -> Result<(), StreamError>
where
    W: AsyncWrite + Unpin,
{
    validate_channel(channel)?;
    let mut buf = Vec::with_capacity(2 + channel.len());
    buf.extend_from_slice(&(channel.len() as u16).to_be_bytes());
    buf.extend_from_slice(channel.as_bytes());
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the channel handshake (frame source side).
pub async fn read_handshake<R>(reader: &mut R) -> Result<String, StreamError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    if len == 0 || len > MAX_CHANNEL_LEN {
        return Err(StreamError::InvalidParameters(format!(
            "handshake declares a {len} byte channel"
        )));
    }
    let mut raw = vec![0u8; len];
    reader.read_exact(&mut raw).await?;
    String::from_utf8(raw)
        .map_err(|e| StreamError::InvalidParameters(format!("channel is not UTF-8: {e}")))
}

/// A connected, handshaken socket to one [`Endpoint`].
#[derive(Debug)]
pub struct TransportConnection {
    stream: TcpStream,
    endpoint: Endpoint,
    max_frame_bytes: usize,
    read_timeout: Option<Duration>,
}

impl TransportConnection {
    /// Connect and send the handshake.
    ///
    /// DNS failures, refusals and the connect timeout all surface as
    /// [`StreamError::ConnectionLost`].
    #[instrument(skip(config), fields(endpoint = %endpoint))]
    pub async fn open(endpoint: &Endpoint, config: &StreamConfig) -> Result<Self, StreamError> {
        let limit = Duration::from_millis(config.connect_timeout_ms);
        info!("Connecting to {}", endpoint);

        let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
        let mut stream = tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| {
                StreamError::ConnectionLost(format!("connect to {endpoint} timed out after {limit:?}"))
            })?
            .map_err(|e| StreamError::ConnectionLost(format!("connect to {endpoint}: {e}")))?;
        stream.set_nodelay(true)?;

        write_handshake(&mut stream, endpoint.channel()).await?;
        debug!("Handshake sent for channel {}", endpoint.channel());

        Ok(Self {
            stream,
            endpoint: endpoint.clone(),
            max_frame_bytes: config.max_frame_bytes,
            read_timeout: config.read_timeout(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Hand the byte stream to a demuxer.
    pub fn into_demuxer(self) -> FrameDemuxer<TcpStream> {
        FrameDemuxer::new(self.stream, self.max_frame_bytes).with_read_timeout(self.read_timeout)
    }

    /// Shut the write half down and drop the socket.
    pub async fn close(mut self) -> Result<(), StreamError> {
        self.stream.shutdown().await?;
        info!("Closed connection to {}", self.endpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config() -> StreamConfig {
        StreamConfig {
            connect_timeout_ms: 2_000,
            ..StreamConfig::default()
        }
    }

    #[tokio::test]
    async fn handshake_roundtrip() {
        let mut buf = Vec::new();
        write_handshake(&mut buf, "lobby-cam").await.unwrap();
        assert_eq!(&buf[..2], &[0, 9]);

        let channel = read_handshake(&mut buf.as_slice()).await.unwrap();
        assert_eq!(channel, "lobby-cam");
    }

    #[tokio::test]
    async fn handshake_rejects_empty_channel() {
        let mut buf = Vec::new();
        assert!(write_handshake(&mut buf, "").await.is_err());
        assert!(read_handshake(&mut &[0u8, 0][..]).await.is_err());
    }

    #[tokio::test]
    async fn open_sends_channel_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            read_handshake(&mut sock).await.unwrap()
        });

        let endpoint = Endpoint::new("127.0.0.1", port, "cam-7").unwrap();
        let conn = TransportConnection::open(&endpoint, &config()).await.unwrap();
        assert_eq!(conn.endpoint(), &endpoint);

        assert_eq!(server.await.unwrap(), "cam-7");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_connection_lost() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Endpoint::new("127.0.0.1", port, "cam").unwrap();
        let err = TransportConnection::open(&endpoint, &config()).await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionLost(_)));
    }
}
