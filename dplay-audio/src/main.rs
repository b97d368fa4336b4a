//! dplay - Main entry point
//!
//! Plays a local audio file through the decode-resample pipeline: the file is
//! probed with symphonia, a feeder thread fills the packet queue, and the
//! output device drives decoding through its buffer-queue callback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use dplay_audio::audio::{CpalDevice, FileSource, NullDevice};
use dplay_audio::AudioPlayer;
use dplay_common::config::PlayerConfig;
use dplay_common::events::{EventBus, PlayerEvent};
use dplay_common::status::{PlayerStatus, ThreadMode, DEVICE_INIT_ERROR_CODE};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for dplay
#[derive(Parser, Debug)]
#[command(name = "dplay")]
#[command(about = "Decode, resample and play an audio file")]
#[command(version)]
struct Args {
    /// Audio file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Output device name (overrides config)
    #[arg(short, long)]
    device: Option<String>,

    /// Drain audio in real time without a sound device
    #[arg(long)]
    null_device: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print player events to stdout as JSON lines
    #[arg(long)]
    json_events: bool,

    /// Configuration file
    #[arg(short, long, env = "DPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(short, long)]
    log_level: Option<String>,
}

/// Why the playback loop stopped
enum Outcome {
    EndOfStream,
    Interrupted,
    Failed(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        PlayerConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("dplay_audio={level},dplay_common={level},dplay={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in CpalDevice::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let file = args
        .file
        .clone()
        .ok_or_else(|| anyhow!("No input file given"))?;

    let mut config = config;
    if args.device.is_some() {
        config.audio.device = args.device.clone();
    }
    let settings = config.audio.clone();

    info!("Starting dplay v{}", env!("CARGO_PKG_VERSION"));
    info!("Input: {}", file.display());

    let status = Arc::new(PlayerStatus::new());
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let mut player = AudioPlayer::from_config(&config, Arc::clone(&status), events)
        .context("Invalid configuration")?;

    let source = FileSource::open(&file).context("Failed to open input file")?;
    let analysis = source
        .analyse(settings.default_frame_size)
        .context("Failed to analyse audio stream")?;
    player
        .on_analysis_stream(ThreadMode::Main, analysis)
        .context("Failed to prepare sample conversion")?;

    let feeder = source
        .spawn_feeder(player.packet_queue(), Arc::clone(&status))
        .context("Failed to start packet feeder")?;

    let factory = if args.null_device {
        NullDevice::factory()
    } else {
        CpalDevice::factory(settings.device.clone())
    };
    player.play(factory).context("Failed to start playback")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Outcome::Interrupted,
            event = rx.recv() => match event {
                Ok(event) => {
                    if args.json_events {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    match event {
                        PlayerEvent::EndOfStream => break Outcome::EndOfStream,
                        PlayerEvent::Error { code, message } if code == DEVICE_INIT_ERROR_CODE => {
                            break Outcome::Failed(message);
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Missed {} player events", n),
                Err(RecvError::Closed) => break Outcome::Interrupted,
            },
            _ = ticker.tick() => {
                info!("Position {:.1}s ({})", player.current_time(), player.state());
            }
        }
    };

    if matches!(outcome, Outcome::EndOfStream) {
        // Let the device play out what is already queued
        let queue = player.buffer_queue();
        for _ in 0..100 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    status.request_exit();
    player.release();

    let fed = feeder
        .join()
        .map_err(|_| anyhow!("Packet feeder thread panicked"))?;
    info!(
        "Stopped at {:.2}s after {} packets",
        player.current_time(),
        fed
    );

    match outcome {
        Outcome::Failed(message) => bail!("Audio device failed: {}", message),
        Outcome::EndOfStream | Outcome::Interrupted => Ok(()),
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
