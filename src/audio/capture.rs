//! Audio capture from an input device
//!
//! The cpal stream lives on its own thread (streams are not `Send`). Device
//! callbacks arrive with arbitrary buffer sizes; they are re-blocked into
//! fixed `block_size` frames before being handed to the [`BlockSink`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioBlock;
use crate::audio::device::find_input_device;
use crate::audio::BlockSink;
use crate::error::AudioError;

/// How long `start` waits for the device to come up
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AudioCapture {
    device_name: Option<String>,
    config: StreamConfig,
    block_size: usize,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    blocks_captured: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Resolve the device up front so a bad name fails before any thread starts
    pub fn new(
        device_name: Option<&str>,
        sample_rate: u32,
        channels: u16,
        block_size: usize,
    ) -> Result<Self, AudioError> {
        find_input_device(device_name)?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(block_size as u32),
        };

        Ok(Self {
            device_name: device_name.map(str::to_string),
            config,
            block_size,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            blocks_captured: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Open the device and start delivering blocks to `sink`
    pub fn start(&mut self, sink: Arc<dyn BlockSink>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let device_name = self.device_name.clone();
        let config = self.config.clone();
        let channels = config.channels;
        let sample_rate = config.sample_rate.0;
        let block_samples = self.block_size * channels as usize;
        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let blocks_captured = self.blocks_captured.clone();

        self.blocks_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let device = match find_input_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut pending: Vec<f32> = Vec::with_capacity(block_samples * 2);
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        pending.extend_from_slice(data);
                        while pending.len() >= block_samples {
                            let samples: Vec<f32> = pending.drain(..block_samples).collect();
                            sink.push_block(AudioBlock::new(samples, channels, sample_rate));
                            blocks_captured.fetch_add(1, Ordering::Relaxed);
                        }
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

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.thread_handle = Some(handle);

        let startup = ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::StreamError("input device did not start".into())));
        if let Err(e) = startup {
            self.stop();
            return Err(e);
        }

        tracing::info!(
            "Capture started: {} Hz, {} ch, {} frames/block",
            sample_rate,
            channels,
            self.block_size
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

    pub fn blocks_captured(&self) -> u64 {
        self.blocks_captured.load(Ordering::Relaxed)
    }

    /// Next asynchronous device error, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
