//! Per-source stream buffers and the additive mixer

use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::buffer::AudioBlock;
use crate::audio::pcm::I16_SCALE;

/// Blocks buffered per stream before the oldest is evicted
pub const STREAM_BUFFER_CAPACITY: usize = 100;

pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 2.0;

/// Upper clip bound: the largest 16-bit sample in the normalized domain
const CLIP_MAX: f32 = i16::MAX as f32 / I16_SCALE;
const CLIP_MIN: f32 = -1.0;

/// One mixer input
pub struct MixerStream {
    id: String,
    name: String,
    enabled: AtomicBool,
    /// `f32` bits
    volume: AtomicU32,
    buffer: ArrayQueue<AudioBlock>,
}

impl MixerStream {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: AtomicBool::new(true),
            volume: AtomicU32::new(1.0f32.to_bits()),
            buffer: ArrayQueue::new(STREAM_BUFFER_CAPACITY),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Queue a block; a disabled stream discards its input.
    /// A full buffer evicts its oldest block.
    pub fn add_audio(&self, block: AudioBlock) {
        if self.is_enabled() {
            self.buffer.force_push(block);
        }
    }

    fn next_block(&self) -> Option<AudioBlock> {
        self.buffer.pop()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&self) {
        while self.buffer.pop().is_some() {}
    }
}

/// Serializable view of a stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub volume: f32,
    pub buffered: usize,
}

/// Sums enabled streams into one output block
pub struct Mixer {
    channels: u16,
    sample_rate: u32,
    streams: DashMap<String, Arc<MixerStream>>,
}

impl Mixer {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            streams: DashMap::new(),
        }
    }

    /// Add a stream, or return the existing one with that id
    pub fn add_stream(&self, id: &str, name: &str) -> Arc<MixerStream> {
        self.streams
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MixerStream::new(id, name)))
            .clone()
    }

    pub fn remove_stream(&self, id: &str) -> bool {
        self.streams.remove(id).is_some()
    }

    pub fn stream(&self, id: &str) -> Option<Arc<MixerStream>> {
        self.streams.get(id).map(|s| s.clone())
    }

    /// Clamp to `[0, 2]`. Returns false for an unknown stream.
    pub fn set_volume(&self, id: &str, volume: f32) -> bool {
        match self.streams.get(id) {
            Some(stream) => {
                let volume = if volume.is_nan() {
                    MIN_VOLUME
                } else {
                    volume.clamp(MIN_VOLUME, MAX_VOLUME)
                };
                stream.volume.store(volume.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.streams.get(id) {
            Some(stream) => {
                stream.enabled.store(enabled, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        let mut infos: Vec<StreamInfo> = self
            .streams
            .iter()
            .map(|entry| {
                let s = entry.value();
                StreamInfo {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    enabled: s.is_enabled(),
                    volume: s.volume(),
                    buffered: s.buffered(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Mix one block of `frames` frames.
    ///
    /// Each enabled stream contributes its next buffered block scaled by its
    /// volume; a stream with nothing buffered contributes nothing. With more
    /// than one contributor the sum is divided by their count. The result is
    /// hard-clipped to the 16-bit range.
    pub fn mix(&self, frames: usize) -> AudioBlock {
        let mut output = AudioBlock::silence(frames, self.channels, self.sample_rate);
        let mut active = 0usize;

        for entry in self.streams.iter() {
            let stream = entry.value();
            if !stream.is_enabled() {
                continue;
            }
            let Some(block) = stream.next_block() else {
                continue;
            };
            if block.channels != self.channels {
                tracing::debug!(
                    "Stream {} has {} channels, mixer expects {}",
                    stream.id,
                    block.channels,
                    self.channels
                );
                continue;
            }

            let volume = stream.volume();
            let available = block.samples.len().min(output.samples.len());
            for (out, s) in output.samples[..available]
                .iter_mut()
                .zip(&block.samples[..available])
            {
                *out += s * volume;
            }
            active += 1;
        }

        if active > 1 {
            let scale = 1.0 / active as f32;
            output.samples.iter_mut().for_each(|s| *s *= scale);
        }
        output
            .samples
            .iter_mut()
            .for_each(|s| *s = s.clamp(CLIP_MIN, CLIP_MAX));
        output
    }
}
