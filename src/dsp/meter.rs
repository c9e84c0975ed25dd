//! Level metering: RMS dBFS, peak hold, and the shared meter state
//! read by the control surface.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::audio::buffer::AudioBlock;
use crate::dsp::spectrum::{SpectrumAnalyzer, FLOOR_DB};

/// Peak hold time before decay starts
pub const DEFAULT_HOLD_TIME: Duration = Duration::from_secs(1);

/// Decay rate in dB per second at the calibrated 10 Hz update cadence
pub const DEFAULT_DECAY_RATE: f32 = 20.0;

/// Meter update cadence that calibrates the peak decay
pub const METER_INTERVAL: Duration = Duration::from_millis(100);

/// RMS level of the first two channels in dBFS, floored at -60 dB.
/// Mono blocks report the same level on both sides.
pub fn calculate_db_fs(block: &AudioBlock) -> (f32, f32) {
    if block.samples.is_empty() {
        return (FLOOR_DB, FLOOR_DB);
    }

    let left = rms_db(block.channel(0));
    let right = if block.channels > 1 {
        rms_db(block.channel(1))
    } else {
        left
    };
    (left, right)
}

fn rms_db(samples: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = samples.fold((0.0f64, 0usize), |(sum, n), s| {
        (sum + (s as f64) * (s as f64), n + 1)
    });
    if count == 0 {
        return FLOOR_DB;
    }
    let rms = (sum / count as f64).sqrt();
    if rms > 0.0 {
        (20.0 * rms.log10()).max(FLOOR_DB as f64) as f32
    } else {
        FLOOR_DB
    }
}

/// Map a dB value onto `[0, 1]` for display
pub fn normalize_db(db: f32, min_db: f32, max_db: f32) -> f32 {
    if db <= min_db {
        0.0
    } else if db >= max_db {
        1.0
    } else {
        (db - min_db) / (max_db - min_db)
    }
}

#[derive(Debug, Clone, Copy)]
struct PeakState {
    peak_db: f32,
    reset_at: Option<Instant>,
}

/// Decaying peak hold for a stereo pair
///
/// Decay is applied per call, not per unit of time: every call made after
/// the hold time has elapsed lowers the peak by `decay_rate * 0.1` dB. The
/// decay rate is therefore only calibrated in dB/s when `update` is called at
/// 10 Hz ([`METER_INTERVAL`]); callers must keep that cadence.
#[derive(Debug, Clone)]
pub struct PeakMeter {
    hold_time: Duration,
    decay_rate: f32,
    channels: [PeakState; 2],
}

impl PeakMeter {
    pub fn new(hold_time: Duration, decay_rate: f32) -> Self {
        let idle = PeakState {
            peak_db: FLOOR_DB,
            reset_at: None,
        };
        Self {
            hold_time,
            decay_rate,
            channels: [idle; 2],
        }
    }

    /// Feed instantaneous levels, returns the held peaks
    pub fn update(&mut self, left_db: f32, right_db: f32, now: Instant) -> (f32, f32) {
        let (hold, decay) = (self.hold_time, self.decay_rate);
        let left = Self::update_channel(&mut self.channels[0], left_db, now, hold, decay);
        let right = Self::update_channel(&mut self.channels[1], right_db, now, hold, decay);
        (left, right)
    }

    fn update_channel(
        state: &mut PeakState,
        level_db: f32,
        now: Instant,
        hold_time: Duration,
        decay_rate: f32,
    ) -> f32 {
        if level_db > state.peak_db {
            state.peak_db = level_db;
            state.reset_at = Some(now);
        } else {
            let held_out = state
                .reset_at
                .map(|t| now.saturating_duration_since(t) > hold_time)
                .unwrap_or(true);
            if held_out {
                state.peak_db = (state.peak_db - decay_rate * 0.1).max(level_db);
            }
        }
        state.peak_db
    }

    pub fn peaks(&self) -> (f32, f32) {
        (self.channels[0].peak_db, self.channels[1].peak_db)
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_TIME, DEFAULT_DECAY_RATE)
    }
}

/// Point-in-time view of every meter on one stream direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelSnapshot {
    pub vu_db: [f32; 2],
    pub peak_db: [f32; 2],
    pub pilot_db: f32,
    pub subcarrier_db: f32,
}

struct MeterState {
    vu_db: [f32; 2],
    peak: PeakMeter,
    last_update: Option<Instant>,
}

/// VU, peak and spectrum meters fed from the audio path
///
/// Writers call [`observe`](Self::observe) for every block; VU and peak levels
/// are refreshed at most every [`METER_INTERVAL`], which keeps the peak decay
/// calibrated regardless of block rate.
///
/// The audio path only ever takes short-held locks. The sample window and the
/// FFT live behind separate mutexes: readers copy the window out and run the
/// transform under `analysis`, which `observe` never touches.
pub struct LevelMeters {
    state: Mutex<MeterState>,
    window: Mutex<SpectrumAnalyzer>,
    analysis: Mutex<SpectrumAnalyzer>,
}

impl LevelMeters {
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        Self {
            state: Mutex::new(MeterState {
                vu_db: [FLOOR_DB; 2],
                peak: PeakMeter::default(),
                last_update: None,
            }),
            window: Mutex::new(SpectrumAnalyzer::new(sample_rate, fft_size)),
            analysis: Mutex::new(SpectrumAnalyzer::new(sample_rate, fft_size)),
        }
    }

    pub fn observe(&self, block: &AudioBlock) {
        self.observe_at(block, Instant::now());
    }

    pub fn observe_at(&self, block: &AudioBlock, now: Instant) {
        self.window.lock().add_samples(block);

        let mut state = self.state.lock();
        let due = state
            .last_update
            .map(|t| now.saturating_duration_since(t) >= METER_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }

        let (left, right) = calculate_db_fs(block);
        state.vu_db = [left, right];
        state.peak.update(left, right, now);
        state.last_update = Some(now);
    }

    /// Current levels. Runs one FFT for the pilot/subcarrier readout on a
    /// copy of the window, off the audio path's locks.
    pub fn snapshot(&self) -> LevelSnapshot {
        let samples = self.window.lock().recent_samples();
        let (pilot_db, subcarrier_db) = {
            let mut analysis = self.analysis.lock();
            analysis.load_samples(&samples);
            analysis.tone_levels()
        };
        let state = self.state.lock();
        let (peak_left, peak_right) = state.peak.peaks();
        LevelSnapshot {
            vu_db: state.vu_db,
            peak_db: [peak_left, peak_right],
            pilot_db,
            subcarrier_db,
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.vu_db = [FLOOR_DB; 2];
        state.peak = PeakMeter::default();
        state.last_update = None;
        drop(state);
        self.window.lock().clear();
    }
}
