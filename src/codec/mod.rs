pub mod factory;
pub mod handle;
pub mod params;

pub use factory::CodecFactory;
pub use handle::{live_contexts, CodecHandle, CodecRole};
pub use params::{default_output_bytes, min_output_bytes, CodecParameters, MAX_DIMENSION};
