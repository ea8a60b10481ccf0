//! Synthetic frame source: serves a moving gradient to every viewer.

use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use framecast::utils::{self, gradient_frame};
use framecast::{CodecFactory, CodecParameters, StreamConfig, StreamError, StreamPublisher};

#[derive(Parser, Debug, Clone)]
#[command(name = "framecast-feed", version, about = "Test pattern frame source")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7332")]
    bind: String,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// JPEG quality, 1-100
    #[arg(short, long, default_value_t = 80)]
    quality: u8,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Only serve this channel; others are hung up on
    #[arg(long)]
    channel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    utils::init_tracing("framecast=info,framecast_feed=info");
    let cli = Cli::parse();

    let params = CodecParameters::with_default_budget(cli.width, cli.height, cli.quality);
    params.validate()?;

    let listener = TcpListener::bind(&cli.bind).await?;
    info!(
        "Serving {}x{} q{} at {} fps on {}",
        cli.width, cli.height, cli.quality, cli.fps, cli.bind
    );

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Viewer connected from {}", peer);
        let cli = cli.clone();
        tokio::spawn(async move {
            match serve(socket, &cli, params).await {
                Ok(frames) => info!("Viewer {} left after {} frames", peer, frames),
                Err(e) => error!("Serving {} failed: {}", peer, e),
            }
        });
    }
}

async fn serve(socket: TcpStream, cli: &Cli, params: CodecParameters) -> Result<u64, StreamError> {
    socket.set_nodelay(true)?;
    let mut publisher = StreamPublisher::accept(socket, &StreamConfig::default()).await?;

    if let Some(only) = &cli.channel {
        if publisher.channel() != only {
            warn!("Refusing channel {}", publisher.channel());
            publisher.close().await?;
            return Ok(0);
        }
    }

    let mut codec = CodecFactory::encoder().create_with(params)?;
    let mut tick = tokio::time::interval(Duration::from_secs(1) / cli.fps.max(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut phase = 0u8;

    let error = loop {
        tick.tick().await;
        let pixels = gradient_frame(params.width, params.height, phase);
        phase = phase.wrapping_add(3);

        // Encoding is CPU bound; keep it off the reactor.
        let (returned, encoded) = tokio::task::spawn_blocking(move || {
            let encoded = codec.encode(&pixels);
            (codec, encoded)
        })
        .await
        .map_err(|e| StreamError::ResourceExhausted(format!("encoder task: {e}")))?;
        codec = returned;

        let sent = match encoded {
            Ok(jpeg) => publisher.send_frame(jpeg).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            break e;
        }
    };

    codec.dispose();
    match error {
        StreamError::ConnectionLost(_) => Ok(publisher.frames_sent()),
        e => Err(e),
    }
}
