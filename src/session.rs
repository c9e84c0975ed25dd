//! Session collaborators: event log, telemetry sink, periodic stats reporter

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::codec::FramingPipeline;
use crate::config::AppConfig;
use crate::control::{ProcessingState, ProcessingUpdate, StreamStatus};
use crate::dsp::meter::{LevelMeters, LevelSnapshot};
use crate::dsp::spectrum::DEFAULT_FFT_SIZE;
use crate::dsp::SignalConditioner;
use crate::error::Result;
use crate::monitor::{MonitorStats, StreamMonitor};
use crate::network::connection::{ConnectionManager, ConnectionState};

/// Interval between stats reports
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Which end of the link a session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sender,
    Receiver,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Sender => f.write_str("sender"),
            Direction::Receiver => f.write_str("receiver"),
        }
    }
}

/// Everything a session reports about itself
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub direction: Direction,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Local>,
    pub state: ConnectionState,
    pub monitor: MonitorStats,
    pub levels: LevelSnapshot,
    /// Jitter buffer fill in `[0, 1]`; always 0 on the sender
    pub buffer_fill: f32,
    pub buffer_overflows: usize,
    pub buffer_underruns: usize,
    /// Blocks dropped because the send queue was full
    pub dropped_blocks: u64,
    pub checksum_failures: u64,
    pub malformed_packets: u64,
    pub agc_gain: f32,
}

/// Discrete session events and a closing stats record
pub trait SessionLog: Send + Sync {
    /// Begin a session, returning its id
    fn start_session(&self, direction: Direction) -> String;
    fn log_event(&self, session_id: &str, name: &str, details: serde_json::Value);
    fn end_session(&self, session_id: &str, stats: &SessionStats);
}

/// Session log that writes structured tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionLog;

impl SessionLog for TracingSessionLog {
    fn start_session(&self, direction: Direction) -> String {
        let id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        tracing::info!(session = %id, %direction, "session started");
        id
    }

    fn log_event(&self, session_id: &str, name: &str, details: serde_json::Value) {
        tracing::info!(session = %session_id, event = %name, %details, "session event");
    }

    fn end_session(&self, session_id: &str, stats: &SessionStats) {
        match serde_json::to_string(stats) {
            Ok(json) => tracing::info!(session = %session_id, stats = %json, "session ended"),
            Err(e) => {
                tracing::warn!(session = %session_id, "session ended, stats unavailable: {}", e)
            }
        }
    }
}

/// Best-effort sink for periodic stats snapshots. Failures are ignored.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, stats: &SessionStats) -> anyhow::Result<()>;
}

/// Background thread invoking a callback at a fixed interval
pub struct StatsReporter {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StatsReporter {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let slice = interval.min(Duration::from_millis(50));

        let handle = thread::Builder::new()
            .name(format!("{}-stats", name))
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while flag.load(Ordering::SeqCst) {
                    if Instant::now() >= next {
                        tick();
                        next += interval;
                    } else {
                        thread::sleep(slice);
                    }
                }
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Publish to an optional sink, logging failures at debug level
pub fn publish_best_effort(sink: Option<&Arc<dyn TelemetrySink>>, stats: &SessionStats) {
    if let Some(sink) = sink {
        if let Err(e) = sink.publish(stats) {
            tracing::debug!("Telemetry publish failed: {}", e);
        }
    }
}

/// External collaborators attached to a session
#[derive(Clone)]
pub struct SessionHooks {
    pub log: Arc<dyn SessionLog>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Default for SessionHooks {
    fn default() -> Self {
        Self {
            log: Arc::new(TracingSessionLog),
            telemetry: None,
        }
    }
}

/// State shared by both stream directions
pub(crate) struct StreamCore {
    pub direction: Direction,
    pub config: AppConfig,
    pub connection: ConnectionManager,
    pub monitor: StreamMonitor,
    pub meters: LevelMeters,
    pub conditioner: Mutex<SignalConditioner>,
    pub pipeline: FramingPipeline,
    hooks: SessionHooks,
    session_id: Mutex<Option<String>>,
}

impl StreamCore {
    /// Validate the configuration and build every per-session component.
    /// Derives the cipher key, which is deliberately slow.
    pub fn new(direction: Direction, config: AppConfig, hooks: SessionHooks) -> Result<Self> {
        config.validate()?;

        let mut conditioner = SignalConditioner::new(
            config.audio.sample_rate,
            config.processing.target_level,
            config.processing.limiter_threshold,
        );
        conditioner.set_agc(config.processing.agc);
        conditioner.set_limiter(config.processing.limiter);

        Ok(Self {
            direction,
            connection: ConnectionManager::new(
                config.network.auto_reconnect,
                Duration::from_secs(config.network.reconnect_interval_secs),
            ),
            monitor: StreamMonitor::new(),
            meters: LevelMeters::new(config.audio.sample_rate, DEFAULT_FFT_SIZE),
            conditioner: Mutex::new(conditioner),
            pipeline: FramingPipeline::from_config(&config.security),
            config,
            hooks,
            session_id: Mutex::new(None),
        })
    }

    pub fn begin_session(&self) {
        self.monitor.reset();
        self.monitor.start();
        self.meters.reset();
        let id = self.hooks.log.start_session(self.direction);
        *self.session_id.lock() = Some(id);
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn log_event(&self, name: &str, details: serde_json::Value) {
        if let Some(id) = self.session_id() {
            self.hooks.log.log_event(&id, name, details);
        }
    }

    /// Close the session log once; later calls are no-ops
    pub fn end_session(&self, stats: &SessionStats) {
        if let Some(id) = self.session_id.lock().take() {
            self.hooks.log.end_session(&id, stats);
        }
    }

    pub fn publish(&self, stats: &SessionStats) {
        publish_best_effort(self.hooks.telemetry.as_ref(), stats);
    }

    pub fn processing(&self) -> ProcessingState {
        let conditioner = self.conditioner.lock();
        ProcessingState {
            agc: conditioner.agc_enabled(),
            limiter: conditioner.limiter_enabled(),
        }
    }

    pub fn set_processing(&self, update: ProcessingUpdate) -> ProcessingState {
        {
            let mut conditioner = self.conditioner.lock();
            if let Some(agc) = update.agc {
                conditioner.set_agc(agc);
            }
            if let Some(limiter) = update.limiter {
                conditioner.set_limiter(limiter);
            }
        }
        let state = self.processing();
        self.log_event(
            "processing_changed",
            serde_json::json!({ "agc": state.agc, "limiter": state.limiter }),
        );
        state
    }

    pub fn status(&self, address: String) -> StreamStatus {
        StreamStatus {
            direction: self.direction,
            running: self.connection.is_running(),
            state: self.connection.state(),
            peer: self.connection.peer(),
            protocol: self.config.network.protocol,
            address,
            sample_rate: self.config.audio.sample_rate,
            channels: self.config.audio.channels(),
            block_size: self.config.audio.block_size,
            processing: self.processing(),
            fec: self.pipeline.fec_enabled(),
            encryption: self.pipeline.encryption_enabled(),
            auto_reconnect: self.connection.auto_reconnect(),
        }
    }

    /// Stats with the direction-independent fields filled in
    pub fn base_stats(&self) -> SessionStats {
        SessionStats {
            direction: self.direction,
            session_id: self.session_id(),
            timestamp: Local::now(),
            state: self.connection.state(),
            monitor: self.monitor.get_stats(),
            levels: self.meters.snapshot(),
            buffer_fill: 0.0,
            buffer_overflows: 0,
            buffer_underruns: 0,
            dropped_blocks: 0,
            checksum_failures: 0,
            malformed_packets: 0,
            agc_gain: self.conditioner.lock().current_gain(),
        }
    }
}
