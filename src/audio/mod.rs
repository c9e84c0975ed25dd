//! Audio subsystem
//!
//! The streaming core never talks to a sound card directly. It exposes two
//! capabilities, [`BlockSink`] (sender side) and [`BlockSource`] (receiver
//! side), which the cpal adapters in [`capture`] and [`playback`] drive from
//! the device callbacks at a fixed block cadence.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod pcm;
pub mod playback;

pub use buffer::{AudioBlock, JitterBuffer, SharedJitterBuffer};
pub use capture::AudioCapture;
pub use device::{list_devices, AudioDeviceInfo};
pub use pcm::SampleFormat;
pub use playback::AudioPlayback;

/// Consumer of captured blocks.
///
/// Called from the real-time input callback: implementations must not block.
pub trait BlockSink: Send + Sync {
    fn push_block(&self, block: AudioBlock);
}

/// Producer of blocks for playback.
///
/// Called from the real-time output callback: implementations must not block
/// and must return exactly `frames` frames.
pub trait BlockSource: Send + Sync {
    fn pull_block(&self, frames: usize) -> AudioBlock;
}
