//! Audio Sender Application
//!
//! Captures from an input device, conditions the signal and streams it to a
//! receiver. Usage: `sender [config.toml]`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpx_link::{
    audio::{capture::AudioCapture, device::list_devices},
    codec::TokenAuthenticator,
    config::AppConfig,
    control::ControlServer,
    network::StreamSender,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MPX link sender");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppConfig::default_path);
    let config = match &config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.validate()?;

    println!("\n=== Available Input Devices ===");
    for device in list_devices().iter().filter(|d| d.is_input) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let sender = Arc::new(StreamSender::new(config.clone())?);
    sender.start()?;
    tracing::info!(
        "Streaming {} {} Hz x{} over {} on {}:{}",
        config.audio.channel_mode.as_str(),
        config.audio.sample_rate,
        config.audio.channels(),
        config.network.protocol,
        config.network.host,
        config.network.port
    );

    let _control = if config.control.enabled {
        let auth = if config.security.authentication {
            TokenAuthenticator::new(config.security.shared_secret.clone())
        } else {
            TokenAuthenticator::disabled()
        };
        Some(ControlServer::new(config.control.clone(), sender.clone(), auth).start_background()?)
    } else {
        None
    };

    let mut capture = AudioCapture::new(
        config.audio.input_device.as_deref(),
        config.audio.sample_rate,
        config.audio.channels(),
        config.audio.block_size,
    )?;
    capture.start(sender.clone())?;
    tracing::info!("Audio capture started - press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    capture.stop();
    sender.stop();
    if let Some(err) = capture.check_errors() {
        tracing::warn!("Capture reported: {}", err);
    }
    Ok(())
}
