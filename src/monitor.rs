//! Stream statistics
//!
//! Counters are updated from the I/O threads and read by the stats reporter
//! and the control surface, always through [`StreamMonitor::get_stats`].

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

/// Capacity of the rolling latency and quality windows
pub const WINDOW_CAPACITY: usize = 100;

/// Reported quality when no quality sample has been recorded
const DEFAULT_QUALITY: f64 = 100.0;

/// Fixed-capacity sample window that overwrites its oldest entry
#[derive(Debug, Clone)]
struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    fn min(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Snapshot returned by [`StreamMonitor::get_stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStats {
    pub uptime_secs: f64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Fraction in `[0, 1]`
    pub packet_loss_rate: f64,
    /// Outgoing bits per second over the whole uptime
    pub bitrate: f64,
    pub receive_bitrate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_quality: f64,
}

#[derive(Debug)]
struct MonitorState {
    started_at: Option<Instant>,
    packets_sent: u64,
    packets_received: u64,
    packets_lost: u64,
    bytes_sent: u64,
    bytes_received: u64,
    last_sequence: Option<u32>,
    latency_ms: RollingWindow,
    quality: RollingWindow,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            started_at: None,
            packets_sent: 0,
            packets_received: 0,
            packets_lost: 0,
            bytes_sent: 0,
            bytes_received: 0,
            last_sequence: None,
            latency_ms: RollingWindow::new(WINDOW_CAPACITY),
            quality: RollingWindow::new(WINDOW_CAPACITY),
        }
    }
}

/// Thread-safe packet and byte counters with derived statistics
#[derive(Debug)]
pub struct StreamMonitor {
    state: Mutex<MonitorState>,
}

impl StreamMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState::new()),
        }
    }

    /// Mark the start of the measured interval
    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&self, now: Instant) {
        self.state.lock().started_at = Some(now);
    }

    pub fn record_sent(&self, bytes: usize) {
        let mut state = self.state.lock();
        state.packets_sent += 1;
        state.bytes_sent += bytes as u64;
    }

    /// Count an arrival and infer loss from the sequence gap.
    ///
    /// Sequences compare with wrapping serial arithmetic. A forward step of
    /// `d` counts `d - 1` losses; a duplicate or late packet counts nothing
    /// and does not move the reference point.
    pub fn record_received(&self, bytes: usize, sequence: u32) {
        let mut state = self.state.lock();
        state.packets_received += 1;
        state.bytes_received += bytes as u64;

        match state.last_sequence {
            None => state.last_sequence = Some(sequence),
            Some(last) => {
                let step = sequence.wrapping_sub(last);
                if step > 0 && step < 1 << 31 {
                    state.packets_lost += u64::from(step - 1);
                    state.last_sequence = Some(sequence);
                }
            }
        }
    }

    pub fn record_latency(&self, latency_ms: f64) {
        self.state.lock().latency_ms.push(latency_ms);
    }

    /// Record a quality sample, in percent
    pub fn record_quality(&self, quality: f64) {
        self.state.lock().quality.push(quality);
    }

    pub fn get_stats(&self) -> MonitorStats {
        self.get_stats_at(Instant::now())
    }

    pub fn get_stats_at(&self, now: Instant) -> MonitorStats {
        let state = self.state.lock();

        let uptime_secs = state
            .started_at
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);

        let denominator = state.packets_sent.max(state.packets_received);
        let packet_loss_rate = if denominator > 0 {
            state.packets_lost as f64 / denominator as f64
        } else {
            0.0
        };

        let per_second = |bytes: u64| {
            if uptime_secs > 0.0 {
                bytes as f64 * 8.0 / uptime_secs
            } else {
                0.0
            }
        };

        MonitorStats {
            uptime_secs,
            packets_sent: state.packets_sent,
            packets_received: state.packets_received,
            packets_lost: state.packets_lost,
            bytes_sent: state.bytes_sent,
            bytes_received: state.bytes_received,
            packet_loss_rate,
            bitrate: per_second(state.bytes_sent),
            receive_bitrate: per_second(state.bytes_received),
            avg_latency_ms: state.latency_ms.average().unwrap_or(0.0),
            min_latency_ms: state.latency_ms.min().unwrap_or(0.0),
            max_latency_ms: state.latency_ms.max().unwrap_or(0.0),
            avg_quality: state.quality.average().unwrap_or(DEFAULT_QUALITY),
        }
    }

    /// Zero every counter and window. Uptime restarts if the monitor was started.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let was_started = state.started_at.is_some();
        *state = MonitorState::new();
        if was_started {
            state.started_at = Some(Instant::now());
        }
    }
}

impl Default for StreamMonitor {
    fn default() -> Self {
        Self::new()
    }
}
