//! Audio blocks and the playback jitter buffer
//!
//! The jitter buffer sits between exactly one producer (the network receive
//! thread) and one consumer (the audio output callback). Every critical
//! section is O(1), so the output callback never waits on network I/O.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::pcm;

/// Block of interleaved, normalized samples
///
/// Invariant: `samples.len() == frames() * channels`. Blocks are never
/// resampled implicitly; `sample_rate` only tags where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Interleaved audio samples in `[-1, 1]`
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Sample rate the block was produced at
    pub sample_rate: u32,
}

impl AudioBlock {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        debug_assert!(channels > 0);
        debug_assert_eq!(samples.len() % channels as usize, 0);
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Zero-filled block of exactly `frames` frames
    pub fn silence(frames: usize, channels: u16, sample_rate: u32) -> Self {
        Self::new(vec![0.0; frames * channels as usize], channels, sample_rate)
    }

    /// Build a block from 16-bit PCM
    pub fn from_i16(pcm: &[i16], channels: u16, sample_rate: u32) -> Self {
        Self::new(
            pcm.iter().copied().map(pcm::from_i16).collect(),
            channels,
            sample_rate,
        )
    }

    /// Rescale to 16-bit PCM
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples.iter().copied().map(pcm::to_i16).collect()
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Block duration in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64 * 1_000_000) / self.sample_rate as u64
    }

    /// Samples of one channel
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f32> + '_ {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels as usize)
            .copied()
    }

    /// Zero-pad or truncate to exactly `frames` frames
    pub fn fit_to(mut self, frames: usize) -> Self {
        self.samples.resize(frames * self.channels as usize, 0.0);
        self
    }
}

/// Bounded FIFO of decoded blocks with an evict-oldest overflow policy
///
/// * `push` never blocks and never fails: when the buffer is full the oldest
///   block is discarded, which bounds the added latency under sustained overrun.
/// * `pop` never blocks and always returns exactly the requested frame count:
///   an empty buffer yields silence, short blocks are zero-padded and long ones
///   truncated.
pub struct JitterBuffer {
    blocks: Mutex<VecDeque<AudioBlock>>,
    capacity: usize,
    channels: u16,
    sample_rate: u32,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl JitterBuffer {
    /// Create a new jitter buffer; `channels` and `sample_rate` shape the
    /// silence emitted on underrun
    pub fn new(capacity: usize, channels: u16, sample_rate: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            blocks: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            channels,
            sample_rate,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a block. Returns true if the oldest block was evicted to make room.
    pub fn push(&self, block: AudioBlock) -> bool {
        let mut blocks = self.blocks.lock();
        let evicted = if blocks.len() >= self.capacity {
            blocks.pop_front();
            true
        } else {
            false
        };
        blocks.push_back(block);
        drop(blocks);

        if evicted {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Pop one block shaped to exactly `frames` frames
    pub fn pop(&self, frames: usize) -> AudioBlock {
        let next = self.blocks.lock().pop_front();
        match next {
            Some(block) => block.fit_to(frames),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                AudioBlock::silence(frames, self.channels, self.sample_rate)
            }
        }
    }

    /// Drop everything buffered
    pub fn clear(&self) {
        self.blocks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total buffered audio in microseconds
    pub fn buffered_us(&self) -> u64 {
        self.blocks.lock().iter().map(AudioBlock::duration_us).sum()
    }

    /// Fill level in `[0, 1]`
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }
}

/// Thread-safe handle to a jitter buffer
pub type SharedJitterBuffer = Arc<JitterBuffer>;
