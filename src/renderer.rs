//! Host-facing facade.
//!
//! One [`StreamRenderer`] owns at most one live session:
//!
//! ```text
//! tokio task                    decode thread                 host render tick
//! ───────────                   ─────────────                 ────────────────
//! TransportConnection::open
//! FrameDemuxer::next_frame ──► flume(0) ──► FrameDecodePipeline ──► LatestFrame ──► render()
//!        │                                        │
//!        └──────────── SessionReporter ───────────┴──► StatusBoard ──► state() / watch_state() / signals()
//! ```
//!
//! The hand-off is a rendezvous channel: the network task reads one frame
//! ahead of the decoder at most, then waits.
//!
//! `render` only ever touches the latest-frame slot, so it never waits on
//! the network or the decoder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{ChannelCatalog, ChannelTag};
use crate::codec::CodecFactory;
use crate::display::RenderSurface;
use crate::error::StreamError;
use crate::frame::{CompressedFrame, DecodedFrame};
use crate::pipeline::{FrameDecodePipeline, LatestFrame, PipelineSnapshot, PipelineStats, SlotStats};
use crate::state::{ConnectionState, SessionReporter, SessionStatus, StatusBoard};
use crate::stream::{Endpoint, TransportConnection};
use crate::{Config, StreamConfig, CONFIG};

/// Result of one [`StreamRenderer::render`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Painted { sequence: u64 },
    /// Nothing decoded yet for the current session.
    NoFrame,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub pipeline: PipelineSnapshot,
    pub slot: SlotStats,
    /// Frames pulled off the socket by the current session.
    pub frames_received: u64,
    pub frames_painted: u64,
}

struct Session {
    endpoint: Endpoint,
    epoch: u64,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    decoder: thread::JoinHandle<Result<(), StreamError>>,
    stats: Arc<PipelineStats>,
    received: Arc<AtomicU64>,
    tag: Option<ChannelTag>,
}

pub struct StreamRenderer {
    config: Config,
    runtime: Handle,
    slot: Arc<LatestFrame>,
    board: Arc<StatusBoard>,
    session: Mutex<Option<Session>>,
    catalog: Option<Arc<dyn ChannelCatalog>>,
    frame_tap: Option<flume::Sender<Arc<DecodedFrame>>>,
    frames_painted: AtomicU64,
}

impl StreamRenderer {
    /// Network work is spawned onto `runtime`; decoding gets its own thread.
    pub fn new(config: Config, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            slot: Arc::new(LatestFrame::new()),
            board: Arc::new(StatusBoard::new()),
            session: Mutex::new(None),
            catalog: None,
            frame_tap: None,
            frames_painted: AtomicU64::new(0),
        }
    }

    /// Build from the global [`CONFIG`] on the current tokio runtime.
    pub fn from_global() -> Result<Self, StreamError> {
        let runtime = Handle::try_current()
            .map_err(|e| StreamError::InvalidParameters(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(CONFIG.load().as_ref().clone(), runtime))
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ChannelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Also deliver every decoded frame, in order, to `tap`.
    pub fn with_frame_tap(mut self, tap: flume::Sender<Arc<DecodedFrame>>) -> Self {
        self.frame_tap = Some(tap);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connect(&self, host: &str, port: u16, channel: &str) -> Result<(), StreamError> {
        self.connect_endpoint(Endpoint::new(host, port, channel)?)
    }

    /// Start streaming from `endpoint`, replacing any current session.
    ///
    /// Returns once the session is set up; the socket is opened in the
    /// background and its outcome shows up in [`state`](Self::state).
    /// Connecting again to the endpoint that is already connecting or
    /// streaming does nothing.
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub fn connect_endpoint(&self, endpoint: Endpoint) -> Result<(), StreamError> {
        let mut guard = self.lock_session();

        if let Some(current) = guard.as_ref() {
            let status = self.board.current();
            if current.endpoint == endpoint && status.epoch == current.epoch && status.state.is_active() {
                debug!("Already {:?} on {}", status.state, endpoint);
                return Ok(());
            }
        }

        let codec = CodecFactory::decoder().create_with(self.config.codec.parameters())?;

        if let Some(previous) = guard.take() {
            info!("Leaving {}", previous.endpoint);
            previous.cancel.cancel();
        }

        let epoch = self.slot.begin_epoch();
        self.board.reset(epoch, ConnectionState::Connecting);
        let reporter = self.board.reporter(epoch);

        let (frames_tx, frames_rx) = flume::bounded::<CompressedFrame>(0);
        let mut pipeline = FrameDecodePipeline::new(codec, Arc::clone(&self.slot), epoch, &self.config.pipeline)
            .with_reporter(reporter.clone());
        if let Some(tap) = &self.frame_tap {
            pipeline = pipeline.with_tap(tap.clone());
        }
        let stats = pipeline.stats();
        let decoder = match pipeline.spawn(frames_rx, &self.config.pipeline.decode_thread_name) {
            Ok(handle) => handle,
            Err(e) => {
                self.board.reset(epoch, ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let received = Arc::new(AtomicU64::new(0));
        let task = self.runtime.spawn(run_session(
            endpoint.clone(),
            self.config.stream.clone(),
            reporter,
            cancel.clone(),
            frames_tx,
            Arc::clone(&received),
        ));

        let tag = self.catalog.as_ref().and_then(|c| c.lookup(endpoint.channel()));
        if let Some(tag) = &tag {
            info!("Channel {} is \"{}\" {:?}", endpoint.channel(), tag.label, tag.classes);
        }

        *guard = Some(Session {
            endpoint,
            epoch,
            cancel,
            task,
            decoder,
            stats,
            received,
            tag,
        });
        Ok(())
    }

    /// Paint the most recent decoded frame onto `surface`.
    ///
    /// Never blocks on I/O or decoding. Returns [`RenderOutcome::NoFrame`]
    /// when nothing has been decoded since the last connect or disconnect.
    pub fn render<S>(&self, surface: &mut S) -> Result<RenderOutcome, StreamError>
    where
        S: RenderSurface + ?Sized,
    {
        let Some(frame) = self.slot.snapshot() else {
            return Ok(RenderOutcome::NoFrame);
        };

        let render_start = Instant::now();
        surface.present(&frame)?;
        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        self.frames_painted.fetch_add(1, Ordering::Relaxed);

        Ok(RenderOutcome::Painted {
            sequence: frame.sequence,
        })
    }

    pub fn latest_frame(&self) -> Option<Arc<DecodedFrame>> {
        self.slot.snapshot()
    }

    /// Tear the session down. The slot is cleared and the state becomes
    /// `Disconnected` before this returns; background work winds down on
    /// its own.
    pub fn disconnect(&self) {
        if let Some(session) = self.detach() {
            info!("Disconnected from {}", session.endpoint);
        }
    }

    /// Like [`disconnect`](Self::disconnect), then wait for the session
    /// task and decode thread to exit.
    pub async fn shutdown(&self) {
        let Some(session) = self.detach() else {
            return;
        };
        if let Err(e) = session.task.await {
            warn!("Session task ended abnormally: {}", e);
        }
        // The task held the only frame sender, so the decoder is draining.
        match tokio::task::spawn_blocking(move || session.decoder.join()).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => debug!("Decoder exited with {}", e),
            Ok(Err(_)) | Err(_) => warn!("Decode thread panicked"),
        }
        info!("Session for {} shut down", session.endpoint);
    }

    pub fn state(&self) -> ConnectionState {
        self.board.current().state
    }

    /// State changes as they happen. Each `connect`/`disconnect` bumps the
    /// epoch in [`SessionStatus`].
    pub fn watch_state(&self) -> watch::Receiver<SessionStatus> {
        self.board.subscribe()
    }

    /// `ConnectionLost`, `FrameTooLarge` and `StreamDegraded` notifications.
    pub fn signals(&self) -> flume::Receiver<StreamError> {
        self.board.signals()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.lock_session().as_ref().map(|s| s.endpoint.clone())
    }

    pub fn channel_tag(&self) -> Option<ChannelTag> {
        self.lock_session().as_ref().and_then(|s| s.tag.clone())
    }

    pub fn stats(&self) -> RendererStats {
        let (pipeline, frames_received) = self
            .lock_session()
            .as_ref()
            .map(|s| (s.stats.snapshot(), s.received.load(Ordering::Relaxed)))
            .unwrap_or_default();
        RendererStats {
            pipeline,
            slot: self.slot.stats(),
            frames_received,
            frames_painted: self.frames_painted.load(Ordering::Relaxed),
        }
    }

    /// Held under the session lock so a concurrent `connect` cannot slip a
    /// session in between the take and the epoch bump.
    fn detach(&self) -> Option<Session> {
        let mut guard = self.lock_session();
        let session = guard.take();
        let epoch = self.slot.begin_epoch();
        self.board.reset(epoch, ConnectionState::Disconnected);
        if let Some(session) = &session {
            session.cancel.cancel();
        }
        drop(guard);
        session
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamRenderer {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            session.cancel.cancel();
        }
    }
}

/// Network half of a session: open, then feed frames to the decode thread
/// until cancelled, the peer goes away or the decoder stops.
async fn run_session(
    endpoint: Endpoint,
    config: StreamConfig,
    reporter: SessionReporter,
    cancel: CancellationToken,
    frames: flume::Sender<CompressedFrame>,
    received: Arc<AtomicU64>,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = TransportConnection::open(&endpoint, &config) => opened,
    };
    let connection = match opened {
        Ok(connection) => connection,
        Err(e) => {
            warn!("Could not open {}: {}", endpoint, e);
            reporter.fault(e);
            return;
        }
    };

    let mut demuxer = connection.into_demuxer();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = demuxer.next_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                received.store(frame.sequence, Ordering::Relaxed);
                if frame.sequence == 1 && reporter.streaming() {
                    info!("Streaming from {}", endpoint);
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = frames.send_async(frame) => {
                        if sent.is_err() {
                            debug!("Decoder gone, ending session");
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                reporter.fault(StreamError::ConnectionLost(format!("{endpoint} closed the stream")));
                break;
            }
            Err(e) => {
                warn!("Stream from {} failed: {}", endpoint, e);
                reporter.fault(e);
                break;
            }
        }
    }
    debug!(
        "Session for {} ended after {} frames",
        endpoint,
        demuxer.frames_read()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::MemorySurface;
    use crate::CodecConfig;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn config() -> Config {
        Config {
            codec: CodecConfig {
                width: 32,
                height: 24,
                ..CodecConfig::default()
            },
            stream: StreamConfig {
                connect_timeout_ms: 2_000,
                ..StreamConfig::default()
            },
            ..Config::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn render_without_session_is_no_frame() {
        let renderer = StreamRenderer::new(config(), Handle::current());
        let mut surface = MemorySurface::new(8, 8);
        assert_eq!(renderer.render(&mut surface).unwrap(), RenderOutcome::NoFrame);
        assert_eq!(renderer.state(), ConnectionState::Disconnected);
        assert!(renderer.endpoint().is_none());
        assert_eq!(surface.frames_presented(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_endpoint_is_rejected_synchronously() {
        let renderer = StreamRenderer::new(config(), Handle::current());
        assert!(matches!(
            renderer.connect("", 7000, "cam"),
            Err(StreamError::InvalidParameters(_))
        ));
        assert!(matches!(
            renderer.connect("127.0.0.1", 7000, ""),
            Err(StreamError::InvalidParameters(_))
        ));
        assert_eq!(renderer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_codec_config_fails_connect() {
        let mut config = config();
        config.codec.width = 0;
        let renderer = StreamRenderer::new(config, Handle::current());
        assert!(matches!(
            renderer.connect("127.0.0.1", 7000, "cam"),
            Err(StreamError::InvalidParameters(_))
        ));
        assert!(renderer.endpoint().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connecting_reports_state_and_tag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut catalog = crate::catalog::StaticCatalog::new();
        catalog.insert(
            "yard",
            ChannelTag {
                label: "Yard".into(),
                classes: vec![],
            },
        );
        let renderer =
            StreamRenderer::new(config(), Handle::current()).with_catalog(Arc::new(catalog));
        renderer.connect("127.0.0.1", port, "yard").unwrap();

        assert!(renderer.state().is_active());
        assert_eq!(renderer.channel_tag().unwrap().label, "Yard");
        assert_eq!(renderer.endpoint().unwrap().channel(), "yard");

        let _accepted = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        renderer.shutdown().await;
        assert_eq!(renderer.state(), ConnectionState::Disconnected);
        assert!(renderer.endpoint().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn racing_connect_and_disconnect_stay_consistent() {
        let renderer = StreamRenderer::new(config(), Handle::current());
        let barrier = std::sync::Barrier::new(2);

        for i in 0..200u16 {
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    renderer.connect("127.0.0.1", 20_000 + i % 2, "cam").unwrap();
                });
                scope.spawn(|| {
                    barrier.wait();
                    renderer.disconnect();
                });
            });
            // A stored session is never reported as Disconnected.
            assert!(
                !(renderer.endpoint().is_some() && renderer.state() == ConnectionState::Disconnected),
                "round {i}: session kept while Disconnected"
            );
        }
        renderer.shutdown().await;
        assert_eq!(renderer.state(), ConnectionState::Disconnected);
    }
}
