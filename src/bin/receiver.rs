//! Audio Receiver Application
//!
//! Receives the stream, buffers it and plays it on an output device.
//! Usage: `receiver [config.toml]`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpx_link::{
    audio::{device::list_devices, playback::AudioPlayback},
    codec::TokenAuthenticator,
    config::AppConfig,
    control::ControlServer,
    network::StreamReceiver,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MPX link receiver");

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

    println!("\n=== Available Output Devices ===");
    for device in list_devices().iter().filter(|d| d.is_output) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let receiver = Arc::new(StreamReceiver::new(config.clone())?);
    receiver.start()?;
    tracing::info!(
        "Receiving {} over {} from {}:{}",
        config.audio.channel_mode.as_str(),
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
        Some(ControlServer::new(config.control.clone(), receiver.clone(), auth).start_background()?)
    } else {
        None
    };

    let mut playback = AudioPlayback::new(
        config.audio.output_device.as_deref(),
        config.audio.sample_rate,
        config.audio.channels(),
        config.audio.block_size,
    )?;
    playback.start(receiver.clone())?;
    tracing::info!("Playback started - press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    playback.stop();
    receiver.stop();
    if let Some(err) = playback.check_errors() {
        tracing::warn!("Playback reported: {}", err);
    }
    let stats = receiver.stats();
    tracing::info!(
        "Received {} packets, lost {}, {} checksum failures",
        stats.monitor.packets_received,
        stats.monitor.packets_lost,
        stats.checksum_failures
    );
    Ok(())
}
