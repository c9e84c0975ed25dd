//! Receiving session
//!
//! ```text
//! receiver-io thread -> socket -> deframe -> cipher -> FEC -> PCM decode -> jitter buffer
//! playback callback  -> pull_block: jitter buffer -> conditioner
//! ```
//!
//! Over TCP the receiver is the client and reconnects with a fixed backoff.
//! Content failures (checksum, framing) drop the packet and the stream
//! continues; over TCP a framing failure also closes the connection since
//! the byte stream can no longer be trusted.

use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioBlock, JitterBuffer};
use crate::audio::{pcm, BlockSource};
use crate::config::AppConfig;
use crate::control::{ProcessingState, ProcessingUpdate, StreamControl, StreamStatus};
use crate::dsp::meter::LevelSnapshot;
use crate::error::{Error, Result, SecurityError};
use crate::network::connection::ConnectionState;
use crate::network::tcp::FrameReader;
use crate::network::{resolve, tcp, udp};
use crate::protocol::{Packet, Protocol, MAX_DATAGRAM_LEN};
use crate::session::{
    Direction, SessionHooks, SessionStats, StatsReporter, StreamCore, REPORT_INTERVAL,
};

/// Pause after an unexpected socket error before reading again
const ERROR_PAUSE: Duration = Duration::from_millis(100);

struct ReceiverInner {
    core: StreamCore,
    jitter: JitterBuffer,
    checksum_failures: AtomicU64,
    malformed_packets: AtomicU64,
    /// Accepted and rejected packets since the last quality sample
    window_accepted: AtomicU64,
    window_rejected: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
}

enum Transport {
    TcpClient(SocketAddr),
    Udp(UdpSocket),
}

pub struct StreamReceiver {
    inner: Arc<ReceiverInner>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    reporter: Mutex<Option<StatsReporter>>,
}

impl StreamReceiver {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_hooks(config, SessionHooks::default())
    }

    pub fn with_hooks(config: AppConfig, hooks: SessionHooks) -> Result<Self> {
        let jitter = JitterBuffer::new(
            config.buffer.jitter_capacity,
            config.audio.channels(),
            config.audio.sample_rate,
        );
        let core = StreamCore::new(Direction::Receiver, config, hooks)?;
        Ok(Self {
            inner: Arc::new(ReceiverInner {
                core,
                jitter,
                checksum_failures: AtomicU64::new(0),
                malformed_packets: AtomicU64::new(0),
                window_accepted: AtomicU64::new(0),
                window_rejected: AtomicU64::new(0),
                local_addr: Mutex::new(None),
            }),
            io_thread: Mutex::new(None),
            reporter: Mutex::new(None),
        })
    }

    /// Start receiving. Over TCP this begins dialing in the background; over
    /// UDP the socket is bound before returning.
    pub fn start(&self) -> Result<()> {
        let core = &self.inner.core;
        if !core.connection.start() {
            return Ok(());
        }

        let transport = match self.open_transport() {
            Ok(transport) => transport,
            Err(e) => {
                core.connection.stop();
                return Err(e);
            }
        };

        core.begin_session();
        self.inner.reset_counters();

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("receiver-io".into())
            .spawn(move || {
                match transport {
                    Transport::TcpClient(addr) => inner.run_tcp_client(addr),
                    Transport::Udp(socket) => inner.run_udp(socket),
                }
                // Terminal: no reconnect, or stopped
                inner.core.connection.stop();
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err(self.abort_start(e.into())),
        };
        *self.io_thread.lock() = Some(handle);

        let inner = self.inner.clone();
        let reporter = StatsReporter::spawn("receiver", REPORT_INTERVAL, move || {
            inner.sample_quality();
            let stats = inner.stats();
            inner.core.publish(&stats);
        });
        let reporter = match reporter {
            Ok(reporter) => reporter,
            Err(e) => return Err(self.abort_start(e)),
        };
        *self.reporter.lock() = Some(reporter);

        Ok(())
    }

    fn open_transport(&self) -> Result<Transport> {
        let network = &self.inner.core.config.network;
        let addr = resolve(&network.host, network.port)?;
        match network.protocol {
            Protocol::Tcp => Ok(Transport::TcpClient(addr)),
            Protocol::Udp => {
                let socket = udp::bind_receiver(addr)?;
                let local = socket.local_addr()?;
                tracing::info!("Receiver listening on udp://{}", local);
                *self.inner.local_addr.lock() = Some(local);
                Ok(Transport::Udp(socket))
            }
        }
    }

    /// Stop receiving. Idempotent; aborts a pending connect or backoff.
    pub fn stop(&self) {
        let was_running = self.inner.core.connection.stop();
        if let Some(handle) = self.io_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(mut reporter) = self.reporter.lock().take() {
            reporter.stop();
        }
        if was_running {
            tracing::info!("Receiver stopped");
        }
        if self.inner.core.session_id().is_some() {
            let stats = self.inner.stats();
            self.inner.core.end_session(&stats);
        }
    }

    /// Undo a partially completed `start`: whatever threads are already up
    /// are stopped and joined before the error is handed back
    fn abort_start(&self, error: Error) -> Error {
        tracing::warn!("Receiver start failed: {}", error);
        self.stop();
        error
    }

    pub fn is_running(&self) -> bool {
        self.inner.core.connection.is_running()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.connection.state()
    }

    /// Bound UDP address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.stats()
    }

    pub fn events(&self) -> crossbeam_channel::Receiver<crate::network::ConnectionEvent> {
        self.inner.core.connection.events()
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.core.connection.set_auto_reconnect(enabled);
    }

    pub fn jitter_buffer(&self) -> &JitterBuffer {
        &self.inner.jitter
    }

    pub fn reconnect_count(&self) -> u64 {
        self.inner.core.connection.reconnect_count()
    }
}

impl ReceiverInner {
    fn reset_counters(&self) {
        self.jitter.clear();
        self.jitter.reset_stats();
        for counter in [
            &self.checksum_failures,
            &self.malformed_packets,
            &self.window_accepted,
            &self.window_rejected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            buffer_fill: self.jitter.fill_level(),
            buffer_overflows: self.jitter.overflow_count(),
            buffer_underruns: self.jitter.underrun_count(),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            ..self.core.base_stats()
        }
    }

    /// Feed the monitor's quality window with the share of packets that
    /// passed integrity and framing checks since the previous sample
    fn sample_quality(&self) {
        let accepted = self.window_accepted.swap(0, Ordering::Relaxed);
        let rejected = self.window_rejected.swap(0, Ordering::Relaxed);
        let total = accepted + rejected;
        if total > 0 {
            self.core
                .monitor
                .record_quality(accepted as f64 * 100.0 / total as f64);
        }
    }

    fn reject(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.window_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Decode one packet into the jitter buffer. Returns whether it was kept.
    fn handle_packet(&self, packet: &Packet, wire_len: usize) -> bool {
        let audio = &self.core.config.audio;

        let bytes = match self.core.pipeline.decode(&packet.payload) {
            Ok(bytes) => bytes,
            Err(SecurityError::IntegrityFailure) => {
                tracing::debug!("Dropping packet {}: checksum mismatch", packet.sequence);
                self.reject(&self.checksum_failures);
                return false;
            }
            Err(e) => {
                tracing::debug!("Dropping packet {}: {}", packet.sequence, e);
                self.reject(&self.malformed_packets);
                return false;
            }
        };

        let decoded = pcm::decode(
            &bytes,
            audio.sample_format,
            audio.channels(),
            audio.sample_rate,
        );
        let block = match decoded {
            Ok(block) => block,
            Err(e) => {
                tracing::debug!("Dropping packet {}: {}", packet.sequence, e);
                self.reject(&self.malformed_packets);
                return false;
            }
        };

        self.core.monitor.record_received(wire_len, packet.sequence);
        self.core.meters.observe(&block);
        if self.jitter.push(block) {
            tracing::debug!("Jitter buffer full, evicted oldest block");
        }
        self.core
            .monitor
            .record_latency(self.jitter.buffered_us() as f64 / 1000.0);
        self.window_accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn run_tcp_client(&self, addr: SocketAddr) {
        let connection = &self.core.connection;
        let running = connection.running_flag();
        let connect_timeout = Duration::from_secs(self.core.config.network.connect_timeout_secs);

        while connection.is_running() {
            connection.transition(ConnectionState::Connecting);

            match tcp::connect(addr, connect_timeout, &running) {
                Ok(stream) => {
                    connection.connected(addr.to_string());
                    self.core
                        .log_event("connected", serde_json::json!({ "peer": addr.to_string() }));
                    self.read_frames(FrameReader::new(stream));
                    connection.transition(ConnectionState::Disconnected);
                    self.core
                        .log_event("disconnected", serde_json::json!({ "peer": addr.to_string() }));
                }
                Err(e) => {
                    if connection.is_running() {
                        tracing::warn!("Connect to {} failed: {}", addr, e);
                        connection.report_error(e.to_string());
                    }
                    connection.transition(ConnectionState::Disconnected);
                }
            }

            if !connection.should_reconnect() {
                break;
            }
            tracing::info!(
                "Reconnecting to {} in {}s",
                addr,
                self.core.config.network.reconnect_interval_secs
            );
            if !connection.wait_backoff() {
                break;
            }
        }

        connection.transition(ConnectionState::Idle);
        tracing::debug!("Receiver I/O thread exiting");
    }

    fn read_frames(&self, mut reader: FrameReader) {
        let connection = &self.core.connection;
        while connection.is_running() {
            match reader.read_packet() {
                Ok(Some(packet)) => {
                    self.handle_packet(&packet, packet.wire_len(Protocol::Tcp));
                }
                Ok(None) => continue,
                Err(Error::Framing(e)) => {
                    tracing::warn!("Closing connection on malformed frame: {}", e);
                    self.reject(&self.malformed_packets);
                    break;
                }
                Err(e) => {
                    tracing::info!("Connection lost: {}", e);
                    connection.report_error(e.to_string());
                    break;
                }
            }
        }
        reader.shutdown();
    }

    fn run_udp(&self, socket: UdpSocket) {
        let connection = &self.core.connection;
        let local = socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        connection.connected(format!("udp://{}", local));

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        while connection.is_running() {
            match udp::recv_packet(&socket, &mut buf) {
                Ok(Some((packet, len))) => {
                    self.handle_packet(&packet, len);
                }
                Ok(None) => continue,
                Err(Error::Framing(e)) => {
                    tracing::debug!("Dropping datagram: {}", e);
                    self.reject(&self.malformed_packets);
                }
                Err(e) => {
                    tracing::warn!("UDP receive failed: {}", e);
                    connection.report_error(e.to_string());
                    thread::sleep(ERROR_PAUSE);
                }
            }
        }

        connection.transition(ConnectionState::Idle);
        tracing::debug!("Receiver I/O thread exiting");
    }
}

impl BlockSource for StreamReceiver {
    /// Pop one block (silence on underrun) and condition it for output
    fn pull_block(&self, frames: usize) -> AudioBlock {
        let mut block = self.inner.jitter.pop(frames);
        self.inner.core.conditioner.lock().process(&mut block);
        block
    }
}

impl StreamControl for StreamReceiver {
    fn status(&self) -> StreamStatus {
        let network = &self.inner.core.config.network;
        let address = self
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| format!("{}:{}", network.host, network.port));
        self.inner.core.status(address)
    }

    fn stats(&self) -> SessionStats {
        self.inner.stats()
    }

    fn levels(&self) -> LevelSnapshot {
        self.inner.core.meters.snapshot()
    }

    fn set_processing(&self, update: ProcessingUpdate) -> ProcessingState {
        self.inner.core.set_processing(update)
    }

    fn stop_stream(&self) {
        self.stop();
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AudioCipher, FramingPipeline};
    use crate::codec::cipher::KEY_LEN;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 48000;
        config.audio.block_size = 4;
        config
    }

    fn inner_with(config: AppConfig) -> StreamReceiver {
        StreamReceiver::new(config).unwrap()
    }

    fn packet(sequence: u32, pipeline: &FramingPipeline, pcm: &[i16]) -> Packet {
        let block = AudioBlock::from_i16(pcm, 2, 48000);
        let bytes = pcm::encode(&block, crate::audio::SampleFormat::I16);
        Packet::new(sequence, pipeline.encode(&bytes).unwrap())
    }

    #[test]
    fn test_accepted_packet_reaches_playback() {
        let receiver = inner_with(config());
        let pcm = [1i16, -1, 1000, -1000, 32767, -32768, 0, 5];
        assert!(receiver
            .inner
            .handle_packet(&packet(0, &FramingPipeline::plain(), &pcm), 24));

        let block = receiver.pull_block(4);
        assert_eq!(block.to_i16(), pcm.to_vec());
        let stats = receiver.stats();
        assert_eq!(stats.monitor.packets_received, 1);
        assert_eq!(stats.monitor.bytes_received, 24);
    }

    #[test]
    fn test_checksum_failure_is_dropped_and_counted() {
        let mut cfg = config();
        cfg.security.fec = true;
        let receiver = inner_with(cfg);
        let pipeline = FramingPipeline::new(true, None);

        let mut bad = packet(0, &pipeline, &[1, 2, 3, 4]);
        let mut bytes = bad.payload.to_vec();
        bytes[0] ^= 0xFF;
        bad.payload = bytes.into();

        assert!(!receiver.inner.handle_packet(&bad, 100));
        assert!(receiver.inner.handle_packet(&packet(1, &pipeline, &[1, 2, 3, 4]), 100));

        let stats = receiver.stats();
        assert_eq!(stats.checksum_failures, 1);
        assert_eq!(stats.monitor.packets_received, 1);
        assert_eq!(receiver.jitter_buffer().len(), 1);
    }

    #[test]
    fn test_misaligned_payload_is_malformed() {
        let receiver = inner_with(config());
        // 3 bytes never form a stereo i16 frame
        let packet = Packet::new(0, vec![1u8, 2, 3]);
        assert!(!receiver.inner.handle_packet(&packet, 7));
        assert_eq!(receiver.stats().malformed_packets, 1);
        assert!(receiver.jitter_buffer().is_empty());
    }

    #[test]
    fn test_truncated_ciphertext_is_malformed() {
        let mut cfg = config();
        cfg.security.encryption = true;
        cfg.security.password = "secret".into();
        let receiver = inner_with(cfg);
        assert!(!receiver.inner.handle_packet(&Packet::new(0, vec![0u8; 4]), 8));
        assert_eq!(receiver.stats().malformed_packets, 1);
        assert_eq!(receiver.stats().checksum_failures, 0);
    }

    #[test]
    fn test_quality_window_sampling() {
        let receiver = inner_with(config());
        let pipeline = FramingPipeline::plain();
        for seq in 0..3 {
            receiver.inner.handle_packet(&packet(seq, &pipeline, &[0; 8]), 24);
        }
        receiver.inner.handle_packet(&Packet::new(3, vec![1u8]), 5);
        receiver.inner.sample_quality();
        assert!((receiver.stats().monitor.avg_quality - 75.0).abs() < 1e-9);

        // Nothing new: no sample recorded
        receiver.inner.sample_quality();
        assert!((receiver.stats().monitor.avg_quality - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_start_leaves_nothing_running() {
        let mut cfg = config();
        cfg.network.protocol = Protocol::Udp;
        cfg.network.port = std::net::UdpSocket::bind("127.0.0.1:0")
            .and_then(|s| s.local_addr())
            .map(|a| a.port())
            .unwrap();
        let receiver = inner_with(cfg);
        receiver.start().unwrap();

        let err = receiver.abort_start(Error::Config("reporter unavailable".into()));
        assert!(matches!(err, Error::Config(_)));
        assert!(!receiver.is_running());
        assert!(receiver.io_thread.lock().is_none());
        assert!(receiver.reporter.lock().is_none());
        assert_eq!(receiver.state(), ConnectionState::Idle);
        assert!(receiver.inner.core.session_id().is_none());
    }

    #[test]
    fn test_underrun_plays_silence() {
        let receiver = inner_with(config());
        let block = receiver.pull_block(16);
        assert_eq!(block.frames(), 16);
        assert!(block.samples.iter().all(|s| *s == 0.0));
        assert_eq!(receiver.stats().buffer_underruns, 1);
    }

    #[test]
    fn test_wrong_key_garbles_without_fec() {
        let mut cfg = config();
        cfg.security.encryption = true;
        cfg.security.password = "secret".into();
        let receiver = inner_with(cfg);

        let other = FramingPipeline::new(false, Some(AudioCipher::from_key([9u8; KEY_LEN])));
        let pcm = [1000i16; 8];
        assert!(receiver.inner.handle_packet(&packet(0, &other, &pcm), 40));
        assert_ne!(receiver.pull_block(4).to_i16(), pcm.to_vec());
    }
}
