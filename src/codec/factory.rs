use tracing::{info, instrument};

use super::handle::{CodecHandle, CodecRole};
use super::params::CodecParameters;
use crate::error::StreamError;

/// Builds [`CodecHandle`]s of one role.
///
/// The factory keeps nothing about the handles it creates; each handle owns
/// its context outright.
#[derive(Debug, Clone, Copy)]
pub struct CodecFactory {
    role: CodecRole,
}

impl CodecFactory {
    pub fn new(role: CodecRole) -> Self {
        Self { role }
    }

    pub fn encoder() -> Self {
        Self::new(CodecRole::Encoder)
    }

    pub fn decoder() -> Self {
        Self::new(CodecRole::Decoder)
    }

    pub fn role(&self) -> CodecRole {
        self.role
    }

    pub fn create(
        &self,
        width: u32,
        height: u32,
        quality: u8,
        max_output_bytes: usize,
    ) -> Result<CodecHandle, StreamError> {
        self.create_with(CodecParameters::new(
            width,
            height,
            quality,
            max_output_bytes,
        ))
    }

    #[instrument(skip(self), fields(role = ?self.role))]
    pub fn create_with(&self, params: CodecParameters) -> Result<CodecHandle, StreamError> {
        params.validate()?;
        let handle = CodecHandle::allocate(self.role, params)?;
        info!(
            "Created {:?} for {}x{} q{}",
            self.role, params.width, params.height, params.quality
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_handles_for_both_roles() {
        let enc = CodecFactory::encoder().create(320, 240, 80, 320 * 240 * 3).unwrap();
        let dec = CodecFactory::decoder().create(320, 240, 80, 320 * 240 * 3).unwrap();
        assert_eq!(enc.role(), CodecRole::Encoder);
        assert_eq!(dec.role(), CodecRole::Decoder);
        assert_eq!(dec.params().width, 320);
    }

    #[test]
    fn invalid_parameters_fail_fast() {
        let err = CodecFactory::decoder().create(320, 240, 0, 1 << 20).unwrap_err();
        assert!(matches!(err, StreamError::InvalidParameters(_)));

        let err = CodecFactory::encoder().create(320, 240, 80, 10).unwrap_err();
        assert!(matches!(err, StreamError::InvalidParameters(_)));
    }

    #[test]
    fn oversized_budget_is_resource_exhausted() {
        // Passes validation but no allocator can satisfy it.
        let err = CodecFactory::encoder()
            .create(16, 16, 80, usize::MAX / 2)
            .unwrap_err();
        assert!(matches!(err, StreamError::ResourceExhausted(_)));
    }
}
