//! Audio playback to an output device

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::find_output_device;
use crate::audio::BlockSource;
use crate::error::AudioError;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AudioPlayback {
    device_name: Option<String>,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl AudioPlayback {
    pub fn new(
        device_name: Option<&str>,
        sample_rate: u32,
        channels: u16,
        block_size: usize,
    ) -> Result<Self, AudioError> {
        find_output_device(device_name)?;

        Ok(Self {
            device_name: device_name.map(str::to_string),
            config: StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Fixed(block_size as u32),
            },
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        })
    }

    /// Open the device; every output callback pulls one block from `source`
    pub fn start(&mut self, source: Arc<dyn BlockSource>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let device_name = self.device_name.clone();
        let config = self.config.clone();
        let channels = config.channels as usize;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                let device = match find_output_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let block = source.pull_block(data.len() / channels);
                        let n = block.samples.len().min(data.len());
                        data[..n].copy_from_slice(&block.samples[..n]);
                        data[n..].fill(0.0);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.thread_handle = Some(handle);

        let startup = ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::StreamError("output device did not start".into())));
        if let Err(e) = startup {
            self.stop();
            return Err(e);
        }

        tracing::info!(
            "Playback started: {} Hz, {} ch",
            self.config.sample_rate.0,
            self.config.channels
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_rejected_before_start() {
        let result = AudioPlayback::new(Some("no-such-output-device-77e2"), 48000, 2, 512);
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }
}
