//! Application configuration
//!
//! Loaded from TOML; every field has a default so a partial (or missing)
//! file is valid. [`AppConfig::validate`] must pass before any stream
//! thread is started.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::audio::pcm::SampleFormat;
use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// Sample rates the link is tested at
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [44100, 48000, 96000, 192000, 384000];

/// Largest accepted block size in frames
pub const MAX_BLOCK_SIZE: usize = 16384;

/// Channel layout of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Stereo,
    /// Single-channel FM multiplex composite
    Mpx,
    /// Eight auxiliary channels
    Multi,
}

impl ChannelMode {
    pub fn channels(self) -> u16 {
        match self {
            ChannelMode::Stereo => 2,
            ChannelMode::Mpx => 1,
            ChannelMode::Multi => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelMode::Stereo => "stereo",
            ChannelMode::Mpx => "mpx",
            ChannelMode::Multi => "multi",
        }
    }
}

impl std::str::FromStr for ChannelMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stereo" => Ok(ChannelMode::Stereo),
            "mpx" | "mono" => Ok(ChannelMode::Mpx),
            "multi" => Ok(ChannelMode::Multi),
            other => Err(format!("unknown channel mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address for the TCP sender and UDP receiver, peer address otherwise
    pub host: String,
    /// Stream port; must be non-zero
    pub port: u16,
    /// Transport, `tcp` or `udp`
    pub protocol: Protocol,
    /// Redial after a lost TCP connection (receiver side)
    pub auto_reconnect: bool,
    /// Fixed backoff between reconnect attempts
    pub reconnect_interval_secs: u64,
    /// Upper bound on a single TCP connect attempt
    pub connect_timeout_secs: u64,
    /// How long the TCP sender waits for a client before rechecking its state
    pub accept_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            protocol: Protocol::Tcp,
            auto_reconnect: true,
            reconnect_interval_secs: 2,
            connect_timeout_secs: 5,
            accept_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// One of the supported rates, 44.1 kHz to 384 kHz
    pub sample_rate: u32,
    /// Frames per block
    pub block_size: usize,
    pub channel_mode: ChannelMode,
    /// Sample width on the wire
    pub sample_format: SampleFormat,
    /// Capture device name; `None` picks the system default
    pub input_device: Option<String>,
    /// Playback device name; `None` picks the system default
    pub output_device: Option<String>,
}

impl AudioConfig {
    pub fn channels(&self) -> u16 {
        self.channel_mode.channels()
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 192000,
            block_size: 1024,
            channel_mode: ChannelMode::Stereo,
            sample_format: SampleFormat::I16,
            input_device: None,
            output_device: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Automatic gain control on at startup
    pub agc: bool,
    /// Hard limiter on at startup
    pub limiter: bool,
    /// AGC target peak level, normalized
    pub target_level: f32,
    /// Limiter ceiling as a fraction of full scale
    pub limiter_threshold: f32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            agc: false,
            limiter: false,
            target_level: crate::dsp::conditioner::DEFAULT_TARGET_LEVEL,
            limiter_threshold: crate::dsp::conditioner::DEFAULT_LIMITER_THRESHOLD,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// AES-256-CFB encryption of every payload
    pub encryption: bool,
    /// Key derivation input; required when `encryption` is on
    pub password: String,
    /// Append and verify an MD5 integrity tag
    pub fec: bool,
    /// Require a token on mutating control requests
    pub authentication: bool,
    /// Secret the control tokens are derived from
    pub shared_secret: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption", &self.encryption)
            .field("fec", &self.fec)
            .field("authentication", &self.authentication)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Jitter buffer capacity in blocks
    pub jitter_capacity: usize,
    /// Blocks queued between the capture callback and the send thread
    pub send_queue: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            jitter_capacity: 100,
            send_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Serve the HTTP control API
    pub enabled: bool,
    /// Interface the control API binds to
    pub bind_address: String,
    /// Control API port; 0 picks a free port
    pub http_port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: 8080,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub processing: ProcessingConfig,
    pub security: SecurityConfig,
    pub buffer: BufferConfig,
    pub control: ControlConfig,
}

impl AppConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Per-user config location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "mpx-link", "mpx-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject configurations that cannot produce a working session
    pub fn validate(&self) -> Result<()> {
        if self.network.port == 0 {
            return Err(Error::Config("port must be non-zero".into()));
        }
        if self.network.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            return Err(Error::Config(format!(
                "unsupported sample rate {} (expected one of {:?})",
                self.audio.sample_rate, SUPPORTED_SAMPLE_RATES
            )));
        }
        if self.audio.block_size == 0 || self.audio.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size {} out of range 1..={}",
                self.audio.block_size, MAX_BLOCK_SIZE
            )));
        }
        if self.security.encryption && self.security.password.is_empty() {
            return Err(Error::Config("encryption enabled without a password".into()));
        }
        if self.security.authentication && self.security.shared_secret.is_empty() {
            return Err(Error::Config(
                "authentication enabled without a shared secret".into(),
            ));
        }
        if self.buffer.jitter_capacity == 0 {
            return Err(Error::Config("jitter capacity must be at least 1".into()));
        }
        if self.buffer.send_queue == 0 {
            return Err(Error::Config("send queue must be at least 1".into()));
        }
        Ok(())
    }

    /// Flatten the stream settings into a preset map
    pub fn to_preset(&self) -> Preset {
        let mut preset = Preset::new();
        preset.insert("host".into(), self.network.host.clone());
        preset.insert("port".into(), self.network.port.to_string());
        preset.insert("protocol".into(), self.network.protocol.to_string());
        preset.insert("samplerate".into(), self.audio.sample_rate.to_string());
        preset.insert("blocksize".into(), self.audio.block_size.to_string());
        preset.insert(
            "device".into(),
            self.audio
                .input_device
                .clone()
                .or_else(|| self.audio.output_device.clone())
                .unwrap_or_default(),
        );
        preset.insert("channel_mode".into(), self.audio.channel_mode.as_str().into());
        preset
    }

    /// Overlay a preset. Unknown keys are ignored; unparsable values are errors.
    pub fn apply_preset(&mut self, preset: &Preset) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| Error::Config(format!("invalid preset value for {}: {}", key, value)))
        }

        for (key, value) in preset {
            match key.as_str() {
                "host" => self.network.host = value.clone(),
                "port" => self.network.port = parse(key, value)?,
                "protocol" => self.network.protocol = parse(key, value)?,
                "samplerate" => self.audio.sample_rate = parse(key, value)?,
                "blocksize" => self.audio.block_size = parse(key, value)?,
                "channel_mode" => self.audio.channel_mode = parse(key, value)?,
                "device" => {
                    let device = (!value.is_empty()).then(|| value.clone());
                    self.audio.input_device = device.clone();
                    self.audio.output_device = device;
                }
                other => tracing::debug!("Ignoring unknown preset key {}", other),
            }
        }
        Ok(())
    }
}

/// Flat key/value preset
pub type Preset = BTreeMap<String, String>;

/// Persistence for named presets
pub trait PresetStore: Send + Sync {
    fn save(&self, name: &str, preset: Preset) -> Result<()>;
    fn load(&self, name: &str) -> Result<Option<Preset>>;
    fn delete(&self, name: &str) -> Result<bool>;
    fn names(&self) -> Vec<String>;
}

/// Process-local preset store
#[derive(Debug, Default)]
pub struct MemoryPresetStore {
    presets: RwLock<BTreeMap<String, Preset>>,
}

impl MemoryPresetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresetStore for MemoryPresetStore {
    fn save(&self, name: &str, preset: Preset) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::Config("preset name must not be empty".into()));
        }
        self.presets.write().insert(name.to_string(), preset);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<Preset>> {
        Ok(self.presets.read().get(name).cloned())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.presets.write().remove(name).is_some())
    }

    fn names(&self) -> Vec<String> {
        self.presets.read().keys().cloned().collect()
    }
}
