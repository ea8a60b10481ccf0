//! framecast viewer: connects to a frame source and paints the live feed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use framecast::display::MemorySurface;
use framecast::{utils, Config, ConnectionState, Endpoint, StaticCatalog, StreamRenderer};

#[derive(Parser, Debug)]
#[command(name = "framecast", version, about = "Live JPEG stream viewer")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frame source host
    #[arg(long)]
    host: Option<String>,

    /// Frame source port
    #[arg(short, long)]
    port: Option<u16>,

    /// Channel to subscribe to
    #[arg(long)]
    channel: Option<String>,

    /// Paint into an off-screen buffer instead of a window
    #[arg(long)]
    headless: bool,

    /// Headless only: save the last painted frame here on exit (PNG/JPEG)
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// Caller-side retry after a fault.
struct Reconnect {
    delay: Option<Duration>,
    due: Option<Instant>,
}

impl Reconnect {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: (delay_ms > 0).then(|| Duration::from_millis(delay_ms)),
            due: None,
        }
    }

    fn poll(&mut self, renderer: &StreamRenderer, endpoint: &Endpoint) {
        let Some(delay) = self.delay else {
            return;
        };
        match (renderer.state(), self.due) {
            (ConnectionState::Faulted(e), None) => {
                warn!("Stream faulted ({}), retrying in {:?}", e, delay);
                self.due = Some(Instant::now() + delay);
            }
            (ConnectionState::Faulted(_), Some(due)) if Instant::now() >= due => {
                self.due = None;
                if let Err(e) = renderer.connect_endpoint(endpoint.clone()) {
                    warn!("Reconnect failed: {}", e);
                }
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.stream.host = host;
    }
    if let Some(port) = cli.port {
        config.stream.port = port;
    }
    if let Some(channel) = cli.channel {
        config.stream.channel = channel;
    }

    utils::init_tracing(&config.logging.filter);
    info!("framecast v{} launching", env!("CARGO_PKG_VERSION"));

    framecast::CONFIG.store(Arc::new(config.clone()));

    let endpoint = config.stream.endpoint()?;
    let catalog = Arc::new(StaticCatalog::from_config(&config));
    let renderer = StreamRenderer::from_global()?.with_catalog(catalog);
    renderer.connect_endpoint(endpoint.clone())?;

    #[cfg(feature = "sdl2-display")]
    if !cli.headless {
        tokio::task::block_in_place(|| run_window(&renderer, &config, &endpoint))?;
        renderer.shutdown().await;
        info!("framecast shutting down");
        return Ok(());
    }
    #[cfg(not(feature = "sdl2-display"))]
    if !cli.headless {
        info!("Built without sdl2-display, painting off-screen");
    }

    let surface = run_headless(&renderer, &config, &endpoint).await;
    renderer.shutdown().await;
    if let Some(path) = cli.snapshot {
        surface.save(&path)?;
        info!("Saved last frame to {}", path.display());
    }
    info!("framecast shutting down");
    Ok(())
}

async fn run_headless(renderer: &StreamRenderer, config: &Config, endpoint: &Endpoint) -> MemorySurface {
    let mut surface = MemorySurface::new(config.display.width, config.display.height);
    let mut reconnect = Reconnect::new(config.display.reconnect_delay_ms);
    let signals = renderer.signals();

    let mut repaint = tokio::time::interval(Duration::from_millis(config.display.repaint_interval_ms.max(1)));
    repaint.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = tokio::time::interval(Duration::from_secs(1));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = repaint.tick() => {
                if let Err(e) = renderer.render(&mut surface) {
                    warn!("Render failed: {}", e);
                }
                reconnect.poll(renderer, endpoint);
            }
            _ = report.tick() => {
                let stats = renderer.stats();
                info!(
                    state = ?renderer.state(),
                    decoded = stats.pipeline.frames_decoded,
                    dropped = stats.pipeline.frames_dropped,
                    painted = stats.frames_painted,
                    last = ?surface.last_sequence(),
                    "Stream status"
                );
            }
            Ok(signal) = signals.recv_async() => {
                warn!("Stream signal: {}", signal);
            }
        }
    }
    surface
}

#[cfg(feature = "sdl2-display")]
fn run_window(renderer: &StreamRenderer, config: &Config, endpoint: &Endpoint) -> Result<()> {
    use color_eyre::eyre::eyre;
    use framecast::display::Sdl2Surface;
    use sdl2::event::Event;

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let title = match renderer.channel_tag() {
        Some(tag) => format!("framecast - {}", tag.label),
        None => format!("framecast - {}", endpoint),
    };
    let mut surface = Sdl2Surface::new(&sdl_context, &title, config.display.width, config.display.height)?;
    let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
    let mut reconnect = Reconnect::new(config.display.reconnect_delay_ms);
    let interval = Duration::from_millis(config.display.repaint_interval_ms);

    'running: loop {
        for event in event_pump.poll_iter() {
            if let Event::Quit { .. } = event {
                info!("Quit event received");
                break 'running;
            }
        }

        for signal in renderer.signals().try_iter() {
            warn!("Stream signal: {}", signal);
        }
        if let Err(e) = renderer.render(&mut surface) {
            warn!("Render failed: {}", e);
        }
        reconnect.poll(renderer, endpoint);
        std::thread::sleep(interval);
    }

    Ok(())
}
