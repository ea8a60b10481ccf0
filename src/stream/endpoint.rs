use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Longest channel token accepted in the handshake.
pub const MAX_CHANNEL_LEN: usize = 1024;

/// A single logical stream source.
///
/// Deserialising goes through [`Endpoint::new`], so a config file cannot
/// produce an endpoint that `connect` would refuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEndpoint")]
pub struct Endpoint {
    host: String,
    port: u16,
    channel: String,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        channel: impl Into<String>,
    ) -> Result<Self, StreamError> {
        let host = host.into();
        let channel = channel.into();

        if host.trim().is_empty() {
            return Err(StreamError::InvalidParameters("host must not be empty".into()));
        }
        if port == 0 {
            return Err(StreamError::InvalidParameters(
                "port must be within 1..=65535".into(),
            ));
        }
        validate_channel(&channel)?;

        Ok(Self {
            host,
            port,
            channel,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[derive(Deserialize)]
struct RawEndpoint {
    host: String,
    port: u16,
    channel: String,
}

impl TryFrom<RawEndpoint> for Endpoint {
    type Error = StreamError;

    fn try_from(raw: RawEndpoint) -> Result<Self, Self::Error> {
        Endpoint::new(raw.host, raw.port, raw.channel)
    }
}

pub(crate) fn validate_channel(channel: &str) -> Result<(), StreamError> {
    if channel.is_empty() || channel.len() > MAX_CHANNEL_LEN {
        return Err(StreamError::InvalidParameters(format!(
            "channel must be 1..={MAX_CHANNEL_LEN} bytes, got {}",
            channel.len()
        )));
    }
    Ok(())
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}/{}", self.host, self.port, self.channel)
        } else {
            write!(f, "{}:{}/{}", self.host, self.port, self.channel)
        }
    }
}
