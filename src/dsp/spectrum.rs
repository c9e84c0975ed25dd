//! Rolling-window spectrum analysis for MPX pilot/subcarrier detection

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::audio::buffer::AudioBlock;

/// Default analysis window in samples
pub const DEFAULT_FFT_SIZE: usize = 8192;

/// Level reported when there is nothing to measure
pub const FLOOR_DB: f32 = -60.0;

/// 19 kHz stereo pilot tone
pub const PILOT_FREQ: f32 = 19_000.0;
pub const PILOT_TOLERANCE: f32 = 100.0;

/// 38 kHz stereo subcarrier
pub const SUBCARRIER_FREQ: f32 = 38_000.0;
pub const SUBCARRIER_TOLERANCE: f32 = 200.0;

const MAGNITUDE_EPSILON: f32 = 1e-10;

/// One frequency bin of a magnitude spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumBin {
    pub frequency: f32,
    pub magnitude_db: f32,
}

/// Hann-windowed magnitude spectrum over the most recent mono samples
///
/// Multi-channel input contributes its first (left) channel only.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    fft_size: usize,
    window: Vec<f32>,
    history: VecDeque<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();

        Self {
            sample_rate,
            fft_size,
            window: hann_window(fft_size),
            history: VecDeque::with_capacity(fft_size),
            fft,
            input,
            output,
            scratch,
        }
    }

    /// Append the left channel of a block to the rolling window
    pub fn add_samples(&mut self, block: &AudioBlock) {
        for sample in block.channel(0) {
            if self.history.len() == self.fft_size {
                self.history.pop_front();
            }
            self.history.push_back(sample);
        }
    }

    /// Copy of the current window, oldest sample first
    pub fn recent_samples(&self) -> Vec<f32> {
        self.history.iter().copied().collect()
    }

    /// Replace the window with the most recent `fft_size` of `samples`
    pub fn load_samples(&mut self, samples: &[f32]) {
        let start = samples.len().saturating_sub(self.fft_size);
        self.history.clear();
        self.history.extend(&samples[start..]);
    }

    pub fn is_ready(&self) -> bool {
        self.history.len() == self.fft_size
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Magnitude spectrum in dB, or `None` until the window is full
    pub fn get_spectrum(&mut self) -> Option<Vec<SpectrumBin>> {
        if !self.is_ready() {
            return None;
        }

        for ((slot, sample), w) in self
            .input
            .iter_mut()
            .zip(self.history.iter())
            .zip(self.window.iter())
        {
            *slot = sample * w;
        }

        if let Err(e) =
            self.fft
                .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
        {
            tracing::warn!("FFT failed: {}", e);
            return None;
        }

        let bin_width = self.sample_rate as f32 / self.fft_size as f32;
        Some(
            self.output
                .iter()
                .enumerate()
                .map(|(k, c)| SpectrumBin {
                    frequency: k as f32 * bin_width,
                    magnitude_db: 20.0 * (c.norm() + MAGNITUDE_EPSILON).log10(),
                })
                .collect(),
        )
    }

    /// Strongest level around 19 kHz
    pub fn pilot_level(&mut self) -> f32 {
        self.get_spectrum()
            .map(|bins| band_peak(&bins, PILOT_FREQ, PILOT_TOLERANCE))
            .unwrap_or(FLOOR_DB)
    }

    /// Strongest level around 38 kHz
    pub fn subcarrier_level(&mut self) -> f32 {
        self.get_spectrum()
            .map(|bins| band_peak(&bins, SUBCARRIER_FREQ, SUBCARRIER_TOLERANCE))
            .unwrap_or(FLOOR_DB)
    }

    /// Pilot and subcarrier levels from a single transform
    pub fn tone_levels(&mut self) -> (f32, f32) {
        match self.get_spectrum() {
            Some(bins) => (
                band_peak(&bins, PILOT_FREQ, PILOT_TOLERANCE),
                band_peak(&bins, SUBCARRIER_FREQ, SUBCARRIER_TOLERANCE),
            ),
            None => (FLOOR_DB, FLOOR_DB),
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Symmetric Hann window
fn hann_window(size: usize) -> Vec<f32> {
    let denom = (size - 1) as f32;
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / denom).cos())
        .collect()
}

/// Maximum dB within `center ± tolerance`, or the floor if no bin falls in range
fn band_peak(bins: &[SpectrumBin], center: f32, tolerance: f32) -> f32 {
    bins.iter()
        .filter(|b| b.frequency >= center - tolerance && b.frequency <= center + tolerance)
        .map(|b| b.magnitude_db)
        .reduce(f32::max)
        .unwrap_or(FLOOR_DB)
}
