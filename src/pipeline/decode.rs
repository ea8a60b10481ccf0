//! Decode stage: compressed frames in, latest-frame slot out.
//!
//! Runs on its own OS thread so JPEG decoding never competes with the
//! render tick or the async reactor. Frames arrive through a zero-capacity
//! `flume` channel, so a send only completes when the decoder takes the
//! frame. While one frame is being decoded the demuxer holds at most one
//! more, waiting in `send_async`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, warn};

use crate::codec::CodecHandle;
use crate::error::StreamError;
use crate::frame::{CompressedFrame, DecodedFrame};
use crate::pipeline::slot::LatestFrame;
use crate::state::SessionReporter;
use crate::PipelineConfig;

/// Counters shared with the host.
#[derive(Default)]
pub struct PipelineStats {
    frames_in: CachePadded<AtomicU64>,
    frames_decoded: CachePadded<AtomicU64>,
    frames_dropped: CachePadded<AtomicU64>,
    last_decode_us: CachePadded<AtomicU64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub frames_in: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub last_decode_us: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            last_decode_us: self.last_decode_us.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one compressed frame.
#[derive(Debug)]
pub enum FrameOutcome {
    Published(Arc<DecodedFrame>),
    /// Decoded, but the slot already held something newer or the epoch ended.
    Superseded(Arc<DecodedFrame>),
    /// Not decodable; the stream carries on.
    Dropped(StreamError),
}

pub struct FrameDecodePipeline {
    codec: CodecHandle,
    slot: Arc<LatestFrame>,
    epoch: u64,
    degraded_threshold: u32,
    consecutive_failures: u32,
    stats: Arc<PipelineStats>,
    reporter: Option<SessionReporter>,
    tap: Option<flume::Sender<Arc<DecodedFrame>>>,
}

impl FrameDecodePipeline {
    /// `codec` must be a decoder; the pipeline owns it from here on.
    pub fn new(
        codec: CodecHandle,
        slot: Arc<LatestFrame>,
        epoch: u64,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            codec,
            slot,
            epoch,
            degraded_threshold: config.degraded_threshold,
            consecutive_failures: 0,
            stats: Arc::new(PipelineStats::default()),
            reporter: None,
            tap: None,
        }
    }

    pub fn with_reporter(mut self, reporter: SessionReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Receive every successfully decoded frame, in order.
    ///
    /// A bounded tap that fills up stalls the decoder.
    pub fn with_tap(mut self, tap: flume::Sender<Arc<DecodedFrame>>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Decode one frame and publish it.
    ///
    /// Malformed frames are absorbed; only errors that make the codec
    /// unusable are returned.
    pub fn process(&mut self, frame: CompressedFrame) -> Result<FrameOutcome, StreamError> {
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let pixels = match self.codec.decode(&frame.data) {
            Ok(pixels) => pixels,
            Err(e @ StreamError::MalformedFrame(_)) => return Ok(self.drop_frame(&frame, e)),
            Err(e) => return Err(e),
        };

        let decode_time = start.elapsed();
        self.consecutive_failures = 0;
        self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_decode_us
            .store(decode_time.as_micros() as u64, Ordering::Relaxed);
        metrics::counter!("frames_decoded").increment(1);
        metrics::histogram!("decode_time_us").record(decode_time.as_micros() as f64);
        metrics::histogram!("frame_latency_ms")
            .record(frame.received_at.elapsed().as_secs_f64() * 1000.0);

        let decoded = Arc::new(DecodedFrame {
            sequence: frame.sequence,
            pixels,
            received_at: frame.received_at,
            decoded_at: Instant::now(),
        });

        if let Some(tap) = &self.tap {
            if tap.send(Arc::clone(&decoded)).is_err() {
                self.tap = None;
            }
        }

        if self.slot.publish(self.epoch, Arc::clone(&decoded)) {
            Ok(FrameOutcome::Published(decoded))
        } else {
            debug!(sequence = decoded.sequence, "Frame superseded");
            Ok(FrameOutcome::Superseded(decoded))
        }
    }

    fn drop_frame(&mut self, frame: &CompressedFrame, error: StreamError) -> FrameOutcome {
        self.consecutive_failures += 1;
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped").increment(1);
        metrics::counter!("decode_failures").increment(1);
        warn!(
            sequence = frame.sequence,
            bytes = frame.len(),
            "Dropping frame: {}",
            error
        );

        if self.consecutive_failures == self.degraded_threshold {
            let signal = StreamError::StreamDegraded {
                consecutive_failures: self.consecutive_failures,
            };
            warn!("{}", signal);
            if let Some(reporter) = &self.reporter {
                reporter.signal(signal);
            }
        }
        FrameOutcome::Dropped(error)
    }

    /// Consume frames until the sender side goes away, then release the codec.
    pub fn run(mut self, frames: flume::Receiver<CompressedFrame>) -> Result<(), StreamError> {
        info!("Decode pipeline started (epoch {})", self.epoch);

        let result = loop {
            let Ok(frame) = frames.recv() else {
                break Ok(());
            };
            if self.reporter.as_ref().is_some_and(|r| !r.is_current()) {
                break Ok(());
            }
            if let Err(e) = self.process(frame) {
                error!("Decode pipeline stopped: {}", e);
                if let Some(reporter) = &self.reporter {
                    reporter.fault(e.clone());
                }
                break Err(e);
            }
        };

        self.codec.dispose();
        let stats = self.stats.snapshot();
        info!(
            "Decode pipeline finished (epoch {}): {} decoded, {} dropped",
            self.epoch, stats.frames_decoded, stats.frames_dropped
        );
        result
    }

    /// Run on a dedicated named thread.
    pub fn spawn(
        self,
        frames: flume::Receiver<CompressedFrame>,
        thread_name: &str,
    ) -> Result<JoinHandle<Result<(), StreamError>>, StreamError> {
        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || self.run(frames))
            .map_err(|e| StreamError::ResourceExhausted(format!("decode thread: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecFactory, CodecParameters};
    use crate::state::{ConnectionState, StatusBoard};
    use crate::utils::gradient_frame;
    use bytes::Bytes;

    const W: u32 = 64;
    const H: u32 = 48;

    fn params() -> CodecParameters {
        CodecParameters::with_default_budget(W, H, 80)
    }

    fn jpeg(phase: u8) -> Bytes {
        let mut enc = CodecFactory::encoder().create_with(params()).unwrap();
        enc.encode(&gradient_frame(W, H, phase)).unwrap()
    }

    fn compressed(sequence: u64, data: Bytes) -> CompressedFrame {
        CompressedFrame {
            sequence,
            data,
            received_at: Instant::now(),
        }
    }

    fn pipeline(slot: &Arc<LatestFrame>, threshold: u32) -> FrameDecodePipeline {
        let codec = CodecFactory::decoder().create_with(params()).unwrap();
        let epoch = slot.begin_epoch();
        let config = PipelineConfig {
            degraded_threshold: threshold,
            ..PipelineConfig::default()
        };
        FrameDecodePipeline::new(codec, Arc::clone(slot), epoch, &config)
    }

    #[test]
    fn frames_arrive_in_order_and_slot_keeps_last() {
        let slot = Arc::new(LatestFrame::new());
        let (tap_tx, tap_rx) = flume::unbounded();
        let pipeline = pipeline(&slot, 5).with_tap(tap_tx);
        let stats = pipeline.stats();

        let (tx, rx) = flume::bounded(1);
        let worker = pipeline.spawn(rx, "test-decode").unwrap();
        let data = jpeg(0);
        for seq in 1..=10 {
            tx.send(compressed(seq, data.clone())).unwrap();
        }
        drop(tx);
        worker.join().unwrap().unwrap();

        let seqs: Vec<u64> = tap_rx.try_iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
        let latest = slot.snapshot().unwrap();
        assert_eq!(latest.sequence, 10);
        assert_eq!((latest.width(), latest.height()), (W, H));
        assert_eq!(stats.snapshot().frames_decoded, 10);
    }

    #[test]
    fn malformed_frame_is_dropped_and_stream_continues() {
        let slot = Arc::new(LatestFrame::new());
        let mut pipeline = pipeline(&slot, 5);

        assert!(matches!(
            pipeline.process(compressed(1, jpeg(1))).unwrap(),
            FrameOutcome::Published(_)
        ));
        assert!(matches!(
            pipeline
                .process(compressed(2, Bytes::from_static(b"\xFF\xD8garbage")))
                .unwrap(),
            FrameOutcome::Dropped(StreamError::MalformedFrame(_))
        ));
        // Last good frame stays visible.
        assert_eq!(slot.snapshot().unwrap().sequence, 1);

        assert!(matches!(
            pipeline.process(compressed(3, jpeg(2))).unwrap(),
            FrameOutcome::Published(_)
        ));
        assert_eq!(slot.snapshot().unwrap().sequence, 3);

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.frames_in, 3);
        assert_eq!(stats.frames_dropped, 1);
    }

    #[test]
    fn repeated_failures_raise_degraded_signal() {
        let board = Arc::new(StatusBoard::new());
        board.reset(1, ConnectionState::Streaming);
        let slot = Arc::new(LatestFrame::new());
        let mut pipeline = pipeline(&slot, 3).with_reporter(board.reporter(1));

        for seq in 1..=4 {
            pipeline
                .process(compressed(seq, Bytes::from_static(b"nope")))
                .unwrap();
        }

        let signals: Vec<StreamError> = board.signals().try_iter().collect();
        assert_eq!(
            signals,
            vec![StreamError::StreamDegraded {
                consecutive_failures: 3
            }]
        );
        // Degradation is reported, not fatal.
        assert_eq!(board.current().state, ConnectionState::Streaming);

        // A good frame re-arms the detector.
        pipeline.process(compressed(5, jpeg(0))).unwrap();
        for seq in 6..=8 {
            pipeline
                .process(compressed(seq, Bytes::from_static(b"nope")))
                .unwrap();
        }
        assert_eq!(board.signals().try_iter().count(), 1);
    }

    #[test]
    fn disposed_codec_faults_the_session() {
        let board = Arc::new(StatusBoard::new());
        board.reset(1, ConnectionState::Streaming);
        let slot = Arc::new(LatestFrame::new());

        let mut codec = CodecFactory::decoder().create_with(params()).unwrap();
        codec.dispose();
        let pipeline = FrameDecodePipeline::new(codec, Arc::clone(&slot), slot.begin_epoch(), &PipelineConfig::default())
            .with_reporter(board.reporter(1));

        let (tx, rx) = flume::bounded(1);
        tx.send(compressed(1, jpeg(0))).unwrap();
        drop(tx);

        assert_eq!(pipeline.run(rx), Err(StreamError::HandleDisposed));
        assert_eq!(
            board.current().state,
            ConnectionState::Faulted(StreamError::HandleDisposed)
        );
    }
}
