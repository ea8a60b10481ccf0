//! Codec context accounting. Lives in its own test binary because
//! `live_contexts` is process-wide.

use framecast::codec::{live_contexts, CodecFactory, CodecRole};
use framecast::utils::gradient_frame;
use framecast::{CodecParameters, StreamError};

#[test]
fn create_and_dispose_returns_to_baseline() {
    let baseline = live_contexts();

    // Explicit dispose, both roles, a spread of sizes.
    for i in 0..200u32 {
        let (w, h) = (16 + (i % 7) * 16, 16 + (i % 5) * 8);
        let role = if i % 2 == 0 {
            CodecRole::Encoder
        } else {
            CodecRole::Decoder
        };
        let mut handle = CodecFactory::new(role).create(w, h, 75, w as usize * h as usize * 3).unwrap();
        assert_eq!(live_contexts(), baseline + 1);
        assert!(handle.dispose());
        assert!(!handle.dispose());
        assert_eq!(live_contexts(), baseline);
    }

    // Dropping without dispose releases too.
    for _ in 0..50 {
        let _enc = CodecFactory::encoder().create(64, 48, 80, 64 * 1024).unwrap();
        let _dec = CodecFactory::decoder().create(64, 48, 80, 64 * 1024).unwrap();
        assert_eq!(live_contexts(), baseline + 2);
    }
    assert_eq!(live_contexts(), baseline);

    // Used handles as well.
    let params = CodecParameters::with_default_budget(64, 48, 80);
    for phase in 0..20u8 {
        let mut enc = CodecFactory::encoder().create_with(params).unwrap();
        let mut dec = CodecFactory::decoder().create_with(params).unwrap();
        let jpeg = enc.encode(&gradient_frame(64, 48, phase)).unwrap();
        dec.decode(&jpeg).unwrap();
        enc.dispose();
        assert_eq!(enc.encode(&gradient_frame(64, 48, 0)), Err(StreamError::HandleDisposed));
    }
    assert_eq!(live_contexts(), baseline);

    // Failed creation allocates nothing.
    assert!(CodecFactory::encoder().create(0, 48, 80, 1024).is_err());
    assert!(CodecFactory::encoder().create(64, 48, 80, usize::MAX / 2).is_err());
    assert_eq!(live_contexts(), baseline);
}
