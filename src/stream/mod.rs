//! Network side of the client: endpoint, connection and frame demuxing.

pub mod demux;
pub mod endpoint;
pub mod transport;

pub use demux::{FrameCodec, FrameDemuxer, DEFAULT_MAX_FRAME_BYTES, LENGTH_PREFIX_BYTES};
pub use endpoint::{Endpoint, MAX_CHANNEL_LEN};
pub use transport::{read_handshake, write_handshake, TransportConnection};
