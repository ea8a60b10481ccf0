pub mod catalog;
pub mod codec;
pub mod display;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod publisher;
pub mod renderer;
pub mod state;
pub mod stream;
pub mod utils;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use catalog::{ChannelCatalog, ChannelTag, StaticCatalog};
pub use codec::{CodecFactory, CodecHandle, CodecParameters, CodecRole};
pub use display::{MemorySurface, RenderSurface};
pub use error::{ErrorKind, StreamError};
pub use frame::{CompressedFrame, DecodedFrame, PixelBuffer, PixelFormat};
pub use pipeline::{FrameDecodePipeline, LatestFrame};
pub use publisher::StreamPublisher;
pub use renderer::{RenderOutcome, RendererStats, StreamRenderer};
pub use state::{ConnectionState, SessionStatus};
pub use stream::{Endpoint, FrameDemuxer, TransportConnection};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `FRAMECAST__STREAM__PORT=9000`.
const ENV_PREFIX: &str = "FRAMECAST";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub codec: CodecConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
    /// Channel id → annotation, served by [`StaticCatalog`].
    pub catalog: HashMap<String, ChannelTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    pub channel: String,
    pub connect_timeout_ms: u64,
    /// 0 disables the idle read timeout.
    pub read_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Derived from the dimensions when unset.
    pub max_output_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Consecutive undecodable frames before `StreamDegraded` is raised.
    pub degraded_threshold: u32,
    pub decode_thread_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub repaint_interval_ms: u64,
    /// Viewer retry delay after a fault; 0 disables reconnecting.
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7332,
            channel: "default".into(),
            connect_timeout_ms: 5_000,
            read_timeout_ms: 0,
            max_frame_bytes: stream::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            quality: 80,
            max_output_bytes: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: 5,
            decode_thread_name: "framecast-decode".into(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            repaint_interval_ms: 8,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "framecast=info".into(),
        }
    }
}

impl StreamConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn endpoint(&self) -> Result<Endpoint, StreamError> {
        Endpoint::new(self.host.clone(), self.port, self.channel.clone())
    }
}

impl CodecConfig {
    pub fn parameters(&self) -> CodecParameters {
        let max_output_bytes = self
            .max_output_bytes
            .unwrap_or_else(|| codec::default_output_bytes(self.width, self.height));
        CodecParameters::new(self.width, self.height, self.quality, max_output_bytes)
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `FRAMECAST__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, StreamError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn from_toml(text: &str) -> Result<Self, StreamError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
