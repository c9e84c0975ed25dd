//! Interleaved little-endian PCM payload encoding
//!
//! Blocks carry normalized `f32` samples in memory. On the wire they are
//! either 16-bit signed integers (scaled by 32768) or raw 32-bit floats.

use serde::{Deserialize, Serialize};

use crate::audio::buffer::AudioBlock;
use crate::error::FramingError;

/// Fixed scale factor between the normalized float domain and 16-bit PCM
pub const I16_SCALE: f32 = 32768.0;

/// Wire sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    I16,
    F32,
}

impl SampleFormat {
    /// Bytes per sample on the wire
    pub fn width(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Convert a normalized sample to 16-bit PCM, saturating at the integer range
#[inline]
pub fn to_i16(sample: f32) -> i16 {
    // float -> int `as` casts saturate
    (sample * I16_SCALE) as i16
}

#[inline]
pub fn from_i16(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}

/// Serialize a block's samples
pub fn encode(block: &AudioBlock, format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.samples.len() * format.width());
    match format {
        SampleFormat::I16 => {
            for &s in &block.samples {
                out.extend_from_slice(&to_i16(s).to_le_bytes());
            }
        }
        SampleFormat::F32 => {
            for &s in &block.samples {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
    }
    out
}

/// Reshape raw bytes into a block with a fixed channel layout.
///
/// Fails (without panicking) when the byte count does not divide evenly
/// into whole frames.
pub fn decode(
    bytes: &[u8],
    format: SampleFormat,
    channels: u16,
    sample_rate: u32,
) -> Result<AudioBlock, FramingError> {
    let width = format.width();
    let frame_bytes = width * channels.max(1) as usize;
    if channels == 0 || bytes.len() % frame_bytes != 0 {
        return Err(FramingError::Misaligned {
            len: bytes.len(),
            channels,
            width,
        });
    }

    let samples = match format {
        SampleFormat::I16 => bytes
            .chunks_exact(2)
            .map(|c| from_i16(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        SampleFormat::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    };

    Ok(AudioBlock::new(samples, channels, sample_rate))
}
