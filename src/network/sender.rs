//! Sending session
//!
//! ```text
//! capture callback -> push_block: conditioner -> meters -> send queue
//! sender-io thread -> PCM encode -> FEC -> cipher -> frame -> socket
//! ```
//!
//! The sequence counter lives on the I/O thread only. Over TCP the sender is
//! the server: it listens, serves one client at a time and goes back to
//! listening when that client leaves.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioBlock;
use crate::audio::{pcm, BlockSink};
use crate::config::AppConfig;
use crate::control::{ProcessingState, ProcessingUpdate, StreamControl, StreamStatus};
use crate::dsp::meter::LevelSnapshot;
use crate::error::{Error, Result, SecurityError};
use crate::network::connection::ConnectionState;
use crate::network::{resolve, tcp, udp};
use crate::protocol::{Packet, Protocol};
use crate::session::{
    Direction, SessionHooks, SessionStats, StatsReporter, StreamCore, REPORT_INTERVAL,
};

/// How often the I/O thread wakes up to check the running flag
const QUEUE_POLL: Duration = Duration::from_millis(100);

struct SenderInner {
    core: StreamCore,
    queue_tx: Sender<AudioBlock>,
    queue_rx: Receiver<AudioBlock>,
    dropped_blocks: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Socket prepared on the calling thread so setup errors surface from `start`
enum Transport {
    Tcp(TcpListener),
    Udp(UdpSocket, SocketAddr),
}

pub struct StreamSender {
    inner: Arc<SenderInner>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    reporter: Mutex<Option<StatsReporter>>,
}

impl StreamSender {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_hooks(config, SessionHooks::default())
    }

    pub fn with_hooks(config: AppConfig, hooks: SessionHooks) -> Result<Self> {
        let (queue_tx, queue_rx) = bounded(config.buffer.send_queue);
        let core = StreamCore::new(Direction::Sender, config, hooks)?;
        Ok(Self {
            inner: Arc::new(SenderInner {
                core,
                queue_tx,
                queue_rx,
                dropped_blocks: AtomicU64::new(0),
                local_addr: Mutex::new(None),
            }),
            io_thread: Mutex::new(None),
            reporter: Mutex::new(None),
        })
    }

    /// Bind (TCP) or target (UDP) the socket and start streaming.
    /// Calling `start` on a running sender does nothing.
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
        self.inner.drain_queue();
        self.inner.dropped_blocks.store(0, Ordering::Relaxed);

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("sender-io".into())
            .spawn(move || match transport {
                Transport::Tcp(listener) => inner.run_tcp_server(listener),
                Transport::Udp(socket, target) => inner.run_udp(socket, target),
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err(self.abort_start(e.into())),
        };
        *self.io_thread.lock() = Some(handle);

        let inner = self.inner.clone();
        let reporter = StatsReporter::spawn("sender", REPORT_INTERVAL, move || {
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
            Protocol::Tcp => {
                let listener = tcp::bind_listener(addr)?;
                let local = listener.local_addr()?;
                tracing::info!("Sender listening on tcp://{}", local);
                *self.inner.local_addr.lock() = Some(local);
                Ok(Transport::Tcp(listener))
            }
            Protocol::Udp => {
                let socket = udp::connect_sender(addr)?;
                tracing::info!("Sender streaming to udp://{}", addr);
                *self.inner.local_addr.lock() = socket.local_addr().ok();
                Ok(Transport::Udp(socket, addr))
            }
        }
    }

    /// Stop streaming and close the socket. Safe to call repeatedly and from
    /// any thread other than the sender's own I/O thread.
    pub fn stop(&self) {
        let was_running = self.inner.core.connection.stop();
        if let Some(handle) = self.io_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(mut reporter) = self.reporter.lock().take() {
            reporter.stop();
        }
        if was_running {
            tracing::info!("Sender stopped");
        }
        if self.inner.core.session_id().is_some() {
            let stats = self.inner.stats();
            self.inner.core.end_session(&stats);
        }
    }

    /// Undo a partially completed `start`: whatever threads are already up
    /// are stopped and joined before the error is handed back
    fn abort_start(&self, error: Error) -> Error {
        tracing::warn!("Sender start failed: {}", error);
        self.stop();
        error
    }

    pub fn is_running(&self) -> bool {
        self.inner.core.connection.is_running()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.connection.state()
    }

    /// Address the TCP listener is bound to, or the UDP socket's local address
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
}

impl SenderInner {
    fn stats(&self) -> SessionStats {
        SessionStats {
            dropped_blocks: self.dropped_blocks.load(Ordering::Relaxed),
            ..self.core.base_stats()
        }
    }

    fn drain_queue(&self) -> usize {
        self.queue_rx.try_iter().count()
    }

    /// PCM-encode and protect one block
    fn frame(
        &self,
        sequence: u32,
        block: &AudioBlock,
    ) -> std::result::Result<Packet, SecurityError> {
        let bytes = pcm::encode(block, self.core.config.audio.sample_format);
        let payload = self.core.pipeline.encode(&bytes)?;
        Ok(Packet::new(sequence, payload))
    }

    /// Next queued block, or `None` after a poll interval with nothing to send
    fn next_block(&self) -> Option<AudioBlock> {
        match self.queue_rx.recv_timeout(QUEUE_POLL) {
            Ok(block) => Some(block),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn run_tcp_server(&self, listener: TcpListener) {
        let connection = &self.core.connection;
        let running = connection.running_flag();
        let accept_timeout = Duration::from_millis(self.core.config.network.accept_timeout_ms);
        let mut sequence: u32 = 0;

        while connection.is_running() {
            connection.transition(ConnectionState::Idle);

            let accepted = tcp::accept_timeout(&listener, accept_timeout, &running);
            let (mut stream, peer) = match accepted {
                Ok(Some(client)) => client,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    connection.report_error(e.to_string());
                    thread::sleep(QUEUE_POLL);
                    continue;
                }
            };

            // Audio queued while nobody was listening is stale
            let stale = self.drain_queue();
            if stale > 0 {
                tracing::debug!("Discarded {} stale blocks", stale);
            }

            connection.connected(peer.to_string());
            self.core
                .log_event("client_connected", serde_json::json!({ "peer": peer.to_string() }));

            while connection.is_running() {
                let Some(block) = self.next_block() else {
                    continue;
                };
                let packet = match self.frame(sequence, &block) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::warn!("Failed to protect block: {}", e);
                        continue;
                    }
                };
                sequence = sequence.wrapping_add(1);

                match tcp::write_packet(&mut stream, &packet) {
                    Ok(bytes) => self.core.monitor.record_sent(bytes),
                    Err(e) => {
                        tracing::info!("Client {} lost: {}", peer, e);
                        connection.report_error(e.to_string());
                        break;
                    }
                }
            }

            let _ = stream.shutdown(Shutdown::Both);
            connection.transition(ConnectionState::Disconnected);
            self.core
                .log_event("client_disconnected", serde_json::json!({ "peer": peer.to_string() }));
        }

        connection.transition(ConnectionState::Idle);
        tracing::debug!("Sender I/O thread exiting");
    }

    fn run_udp(&self, socket: UdpSocket, target: SocketAddr) {
        let connection = &self.core.connection;
        connection.connected(format!("udp://{}", target));
        let mut sequence: u32 = 0;

        while connection.is_running() {
            let Some(block) = self.next_block() else {
                continue;
            };
            let packet = match self.frame(sequence, &block) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!("Failed to protect block: {}", e);
                    continue;
                }
            };
            sequence = sequence.wrapping_add(1);

            match udp::send_packet(&socket, &packet) {
                Ok(bytes) => self.core.monitor.record_sent(bytes),
                // e.g. ICMP port unreachable while the receiver is down
                Err(e) => tracing::debug!("Datagram {} not sent: {}", packet.sequence, e),
            }
        }

        connection.transition(ConnectionState::Idle);
        tracing::debug!("Sender I/O thread exiting");
    }
}

impl BlockSink for StreamSender {
    /// Condition, meter and enqueue one captured block without blocking.
    /// A full queue drops the block.
    fn push_block(&self, mut block: AudioBlock) {
        if !self.is_running() {
            return;
        }
        self.inner.core.conditioner.lock().process(&mut block);
        self.inner.core.meters.observe(&block);

        if let Err(TrySendError::Full(_)) = self.inner.queue_tx.try_send(block) {
            self.inner.dropped_blocks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl StreamControl for StreamSender {
    fn status(&self) -> StreamStatus {
        let address = self
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| {
                let network = &self.inner.core.config.network;
                format!("{}:{}", network.host, network.port)
            });
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

impl Drop for StreamSender {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tcp::FrameReader;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn loopback_config(protocol: Protocol, port: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.network.protocol = protocol;
        config.network.port = port;
        config.network.accept_timeout_ms = 100;
        config.audio.sample_rate = 48000;
        config.audio.block_size = 64;
        config
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_invalid_config_rejected_before_start() {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 12345;
        assert!(StreamSender::new(config).is_err());
    }

    #[test]
    fn test_push_is_noop_when_stopped() {
        let sender = StreamSender::new(loopback_config(Protocol::Tcp, 5000)).unwrap();
        sender.push_block(AudioBlock::silence(64, 2, 48000));
        assert_eq!(sender.inner.queue_rx.len(), 0);
    }

    #[test]
    fn test_full_queue_drops_blocks() {
        let mut config = loopback_config(Protocol::Tcp, free_port());
        config.buffer.send_queue = 2;
        let sender = StreamSender::new(config).unwrap();
        sender.start().unwrap();

        // No client: the I/O thread is accepting, nothing drains the queue
        for _ in 0..5 {
            sender.push_block(AudioBlock::silence(64, 2, 48000));
        }
        assert_eq!(sender.stats().dropped_blocks, 3);
        sender.stop();
    }

    #[test]
    fn test_tcp_client_receives_sequenced_frames() {
        let sender = StreamSender::new(loopback_config(Protocol::Tcp, free_port())).unwrap();
        sender.start().unwrap();
        let addr = sender.local_addr().unwrap();

        let stream = tcp::connect(addr, Duration::from_secs(5), &AtomicBool::new(true)).unwrap();
        wait_for(|| sender.state() == ConnectionState::Connected);

        let block = AudioBlock::from_i16(&[100i16; 128], 2, 48000);
        for _ in 0..3 {
            sender.push_block(block.clone());
        }

        let mut reader = FrameReader::new(stream);
        let mut sequences = Vec::new();
        while sequences.len() < 3 {
            if let Some(packet) = reader.read_packet().unwrap() {
                assert_eq!(packet.payload.len(), 256);
                sequences.push(packet.sequence);
            }
        }
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(sender.stats().monitor.packets_sent, 3);

        sender.stop();
        assert_eq!(sender.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_returns_to_listening_after_client_leaves() {
        let sender = StreamSender::new(loopback_config(Protocol::Tcp, free_port())).unwrap();
        sender.start().unwrap();
        let addr = sender.local_addr().unwrap();
        let running = AtomicBool::new(true);

        let first = tcp::connect(addr, Duration::from_secs(5), &running).unwrap();
        wait_for(|| sender.state() == ConnectionState::Connected);
        drop(first);

        // Writes to the closed socket fail and the sender goes back to accept
        let block = AudioBlock::silence(64, 2, 48000);
        wait_for(|| {
            sender.push_block(block.clone());
            sender.state() != ConnectionState::Connected
        });

        let _second = tcp::connect(addr, Duration::from_secs(5), &running).unwrap();
        wait_for(|| sender.state() == ConnectionState::Connected);
        sender.stop();
    }

    #[test]
    fn test_failed_start_leaves_nothing_running() {
        let sender = StreamSender::new(loopback_config(Protocol::Tcp, free_port())).unwrap();
        sender.start().unwrap();
        assert!(sender.inner.core.session_id().is_some());

        let err = sender.abort_start(Error::Config("reporter unavailable".into()));
        assert!(matches!(err, Error::Config(_)));
        assert!(!sender.is_running());
        assert!(sender.io_thread.lock().is_none());
        assert_eq!(sender.state(), ConnectionState::Idle);
        assert!(sender.inner.core.session_id().is_none());

        // The sender can be started again afterwards
        sender.start().unwrap();
        assert!(sender.is_running());
        sender.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let sender = StreamSender::new(loopback_config(Protocol::Udp, free_port())).unwrap();
        sender.start().unwrap();
        wait_for(|| sender.state() == ConnectionState::Connected);
        sender.stop();
        sender.stop();
        assert!(!sender.is_running());
        assert_eq!(sender.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_processing_toggles() {
        let sender = StreamSender::new(loopback_config(Protocol::Tcp, 5000)).unwrap();
        let state = sender.set_processing(ProcessingUpdate {
            agc: Some(true),
            limiter: None,
        });
        assert_eq!(state, ProcessingState { agc: true, limiter: false });
        assert!(sender.status().processing.agc);
    }
}
