//! Dub Player (dub-player) - Main entry point
//!
//! Headless runner: streams the dub track for one video from the dubbing
//! backend into a file, with simulated clocks standing in for the video and
//! dub players. Exits once the whole stream has been appended.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dub_common::events::{DubEvent, EventBus};
use dub_player::config::{Config, ConfigOverrides};
use dub_player::playback::{FileSink, SimulatedClock};
use dub_player::segment::{HttpBackend, MediaId};
use dub_player::{Session, SessionParams};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for dub-player
#[derive(Parser, Debug)]
#[command(name = "dub-player")]
#[command(about = "Streams a dubbed audio track segment by segment")]
#[command(version)]
struct Args {
    /// Video identifier known to the backend
    #[arg(short, long)]
    media_id: String,

    /// Dubbing backend base URL
    #[arg(short, long, env = "DUB_BACKEND_URL")]
    backend: Option<String>,

    /// File receiving the dub stream
    #[arg(short, long, default_value = "dub.mp3")]
    output: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long, env = "DUB_CONFIG")]
    config: Option<PathBuf>,

    /// Prefetch window (segments)
    #[arg(short, long)]
    window: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        window: args.window,
        backend_url: args.backend.clone(),
        log_level: args.log_level.clone(),
    };
    let config = Config::load(args.config.as_deref(), overrides)
        .context("Failed to load configuration")?;

    // Initialize tracing
    let default_filter = format!(
        "dub_player={level},dub_common={level}",
        level = config.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting dub-player for {}", args.media_id);
    info!("Backend: {}", config.backend.base_url);
    info!("Output: {}", args.output.display());

    let backend = Arc::new(
        HttpBackend::new(config.backend.clone()).context("Failed to create backend client")?,
    );
    let bus = Arc::new(EventBus::new(config.event_bus_capacity));
    let mut events = bus.subscribe();

    let handle = Session::start(SessionParams {
        config: config.session.clone(),
        media_id: MediaId::new(args.media_id.clone()),
        manifest_provider: backend.clone(),
        segment_provider: backend,
        sink: Box::new(FileSink::new(&args.output)),
        primary: Box::new(SimulatedClock::new()),
        secondary: Box::new(SimulatedClock::new()),
        bus: Arc::clone(&bus),
    })
    .await
    .context("Failed to start dub session")?;

    let mut aborted = None;
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    log_event(&event);
                    match event {
                        DubEvent::StreamEnded { .. } => break,
                        DubEvent::StreamAborted { reason, .. } => {
                            aborted = Some(reason);
                            break;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event monitor lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    handle.shutdown();
    handle.join().await.context("Session did not shut down cleanly")?;

    if let Some(reason) = aborted {
        anyhow::bail!("Dub stream aborted: {}", reason);
    }

    info!("Dub stream written to {}", args.output.display());
    Ok(())
}

fn log_event(event: &DubEvent) {
    match event {
        DubEvent::SegmentAppended {
            segment_id, bytes, ..
        } => info!("Appended {} ({} bytes)", segment_id, bytes),
        DubEvent::SegmentSkipped {
            segment_id, reason, ..
        } => warn!("Skipped {}: {}", segment_id, reason),
        DubEvent::Notice { notice, .. } => warn!("Notice: {:?}", notice),
        DubEvent::StreamEnded {
            appended,
            skipped,
            buffered_bytes,
            ..
        } => info!(
            "Stream ended: {} appended, {} skipped, {} bytes",
            appended, skipped, buffered_bytes
        ),
        DubEvent::StreamAborted { reason, .. } => error!("Stream aborted: {}", reason),
        other => match serde_json::to_string(other) {
            Ok(json) => debug!("{}", json),
            Err(_) => debug!("{}", other.event_type()),
        },
    }
}
