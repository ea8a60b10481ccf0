//! Frame pipeline between the network and the renderer.

pub mod decode;
pub mod slot;

pub use decode::{FrameDecodePipeline, FrameOutcome, PipelineSnapshot, PipelineStats};
pub use slot::{LatestFrame, SlotStats};
