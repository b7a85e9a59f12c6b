//! Duplex streamer
//!
//! Connects to the remote peer, plays what it sends and streams the local
//! microphone back until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duplex_audio_link::{
    audio::device::list_devices,
    config::{AppConfig, Preferences},
    network::WebSocketTransport,
    protocol::MediaMode,
    session::{CpalDevices, Recorder},
};

#[derive(Parser, Debug)]
#[command(name = "streamer", version, about = "Duplex audio streaming over WebSocket")]
struct Args {
    /// Remote host
    #[arg(long)]
    host: Option<String>,

    /// Remote port
    #[arg(long)]
    port: Option<u16>,

    /// Media mode: audio or video
    #[arg(long)]
    mode: Option<MediaMode>,

    /// WebSocket path
    #[arg(long)]
    path: Option<String>,

    /// Use wss://
    #[arg(long)]
    secure: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input device id (see --list-devices)
    #[arg(long)]
    input: Option<String>,

    /// Output device id (see --list-devices)
    #[arg(long)]
    output: Option<String>,

    /// Persist mode, host and port as the new defaults
    #[arg(long)]
    save: bool,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };

    let prefs_path = Preferences::default_path();
    if let Some(path) = &prefs_path {
        match Preferences::load(path) {
            Ok(prefs) => prefs.apply_to(&mut config.session),
            Err(e) => tracing::warn!("Ignoring preferences at {}: {}", path.display(), e),
        }
    }

    if let Some(host) = args.host {
        config.session.host = host;
    }
    if let Some(port) = args.port {
        config.session.port = port;
    }
    if let Some(mode) = args.mode {
        config.session.mode = mode;
    }
    if let Some(path) = args.path {
        config.session.path = path;
    }
    if args.secure {
        config.session.secure = true;
    }

    if args.save {
        match &prefs_path {
            Some(path) => {
                Preferences::from_session(&config.session).save(path)?;
                tracing::info!("Preferences saved to {}", path.display());
            }
            None => tracing::warn!("No preferences directory on this platform"),
        }
    }

    tracing::info!(
        "Starting streamer: {} ({} mode)",
        config.session.url(),
        config.session.mode
    );

    let devices = CpalDevices {
        input_id: args.input,
        output_id: args.output,
    };
    let mut recorder = Recorder::new(WebSocketTransport::new(), devices, config);
    let mut recording = recorder.recording();
    let mut errors = recorder.error();

    recorder.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            changed = errors.changed() => {
                if changed.is_err() {
                    break;
                }
                let message = errors.borrow_and_update().clone();
                if !message.is_empty() {
                    tracing::warn!("{}", message);
                }
            }
            changed = recording.changed() => {
                if changed.is_err() || !*recording.borrow_and_update() {
                    tracing::info!("Session ended");
                    break;
                }
            }
        }
    }

    recorder.stop().await;
    Ok(())
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
    }
    println!();
}
