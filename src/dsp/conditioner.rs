//! Signal conditioning: automatic gain control followed by a hard limiter
//!
//! Operates on normalized samples; the `[-1, 1]` <-> 16-bit PCM rescaling
//! (fixed factor 32768) happens at the PCM boundary in [`crate::audio::pcm`].

use crate::audio::buffer::AudioBlock;
use crate::stage::Stage;

/// Guards the gain computation against division by zero
const GAIN_EPSILON: f32 = 1e-10;

/// AGC attack time constant in seconds
pub const ATTACK_TIME: f32 = 0.005;

/// AGC release time constant in seconds
pub const RELEASE_TIME: f32 = 0.1;

/// Default AGC target level (normalized)
pub const DEFAULT_TARGET_LEVEL: f32 = 0.7;

/// Default limiter ceiling (fraction of full scale)
pub const DEFAULT_LIMITER_THRESHOLD: f32 = 0.95;

/// One-pole smoothing coefficient for a time constant at a sample rate
fn smoothing_coef(sample_rate: u32, time_constant: f32) -> f32 {
    (-1.0 / (sample_rate as f32 * time_constant)).exp()
}

/// Automatic gain control with fast attack and slow release toward unity
#[derive(Debug, Clone)]
pub struct Agc {
    target_level: f32,
    attack_coef: f32,
    release_coef: f32,
    current_gain: f32,
}

impl Agc {
    pub fn new(sample_rate: u32, target_level: f32) -> Self {
        Self {
            target_level,
            attack_coef: smoothing_coef(sample_rate, ATTACK_TIME),
            release_coef: smoothing_coef(sample_rate, RELEASE_TIME),
            current_gain: 1.0,
        }
    }

    /// Apply gain in place, updating the gain once per frame.
    ///
    /// The level of a frame is the largest magnitude across its channels and
    /// the whole frame is scaled by the same gain.
    pub fn process(&mut self, samples: &mut [f32], channels: usize) {
        for frame in samples.chunks_mut(channels.max(1)) {
            let level = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));

            if level > self.current_gain * self.target_level {
                self.current_gain = self.attack_coef * self.current_gain
                    + (1.0 - self.attack_coef) * (self.target_level / (level + GAIN_EPSILON));
            } else {
                self.current_gain =
                    self.release_coef * self.current_gain + (1.0 - self.release_coef);
            }

            for s in frame.iter_mut() {
                *s *= self.current_gain;
            }
        }
    }

    pub fn current_gain(&self) -> f32 {
        self.current_gain
    }

    pub fn attack_coef(&self) -> f32 {
        self.attack_coef
    }

    pub fn release_coef(&self) -> f32 {
        self.release_coef
    }

    pub fn target_level(&self) -> f32 {
        self.target_level
    }
}

/// Hard clipper
#[derive(Debug, Clone, Copy)]
pub struct Limiter {
    threshold: f32,
}

impl Limiter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.abs(),
        }
    }

    pub fn process(&self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = s.clamp(-self.threshold, self.threshold);
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// AGC + limiter chain for one stream direction
///
/// Owns its gain state exclusively; never shared between directions.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    sample_rate: u32,
    target_level: f32,
    limiter_threshold: f32,
    agc: Stage<Agc>,
    limiter: Stage<Limiter>,
}

impl SignalConditioner {
    pub fn new(sample_rate: u32, target_level: f32, limiter_threshold: f32) -> Self {
        Self {
            sample_rate,
            target_level,
            limiter_threshold,
            agc: Stage::Identity,
            limiter: Stage::Identity,
        }
    }

    /// Conditioner with the default target level and threshold, both stages off
    pub fn with_defaults(sample_rate: u32) -> Self {
        Self::new(sample_rate, DEFAULT_TARGET_LEVEL, DEFAULT_LIMITER_THRESHOLD)
    }

    /// Condition a block in place: AGC first, then the limiter
    pub fn process(&mut self, block: &mut AudioBlock) {
        let channels = block.channels as usize;
        if let Some(agc) = self.agc.active_mut() {
            agc.process(&mut block.samples, channels);
        }
        if let Some(limiter) = self.limiter.active() {
            limiter.process(&mut block.samples);
        }
    }

    /// Enable or disable AGC. Re-enabling starts again from unity gain.
    pub fn set_agc(&mut self, enabled: bool) {
        match (enabled, self.agc.is_active()) {
            (true, false) => {
                self.agc = Stage::Active(Agc::new(self.sample_rate, self.target_level));
            }
            (false, true) => self.agc = Stage::Identity,
            _ => {}
        }
    }

    pub fn set_limiter(&mut self, enabled: bool) {
        self.limiter = if enabled {
            Stage::Active(Limiter::new(self.limiter_threshold))
        } else {
            Stage::Identity
        };
    }

    pub fn agc_enabled(&self) -> bool {
        self.agc.is_active()
    }

    pub fn limiter_enabled(&self) -> bool {
        self.limiter.is_active()
    }

    /// Current AGC gain (unity while AGC is off)
    pub fn current_gain(&self) -> f32 {
        self.agc.active().map(Agc::current_gain).unwrap_or(1.0)
    }
}
