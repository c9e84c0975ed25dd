//! Connection lifecycle state machine
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected -> Connecting (auto-reconnect)
//!                                                 -> Idle       (otherwise)
//! ```
//!
//! Cancellation is cooperative: I/O loops check [`ConnectionManager::is_running`]
//! at their heads and between bounded-timeout blocking calls.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Granularity at which a backoff sleep observes the stop flag
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Lifecycle notifications for observers (status displays, tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Human-readable peer description on entering `Connected`
    PeerConnected(String),
    Error(String),
}

/// Owns the connection state, the running flag, and the reconnect policy
pub struct ConnectionManager {
    running: Arc<AtomicBool>,
    state: Mutex<ConnectionState>,
    peer: Mutex<Option<String>>,
    auto_reconnect: AtomicBool,
    reconnect_interval: Duration,
    reconnects: AtomicU64,
    event_tx: Sender<ConnectionEvent>,
    event_rx: Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(auto_reconnect: bool, reconnect_interval: Duration) -> Self {
        let (event_tx, event_rx) = bounded(256);
        Self {
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ConnectionState::Idle),
            peer: Mutex::new(None),
            auto_reconnect: AtomicBool::new(auto_reconnect),
            reconnect_interval,
            reconnects: AtomicU64::new(0),
            event_tx,
            event_rx,
        }
    }

    /// Arm the running flag. Returns false if already running.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// Clear the running flag. Idempotent; returns whether it was running.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared handle to the running flag for callbacks that cannot hold `self`
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn peer(&self) -> Option<String> {
        self.peer.lock().clone()
    }

    pub fn transition(&self, to: ConnectionState) {
        let from = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, to)
        };
        if from == to {
            return;
        }
        if to != ConnectionState::Connected {
            *self.peer.lock() = None;
        }
        tracing::debug!("Connection state {} -> {}", from, to);
        self.emit(ConnectionEvent::StateChanged { from, to });
    }

    /// Enter `Connected` and remember the peer
    pub fn connected(&self, peer: impl Into<String>) {
        let peer = peer.into();
        tracing::info!("Connected to {}", peer);
        self.transition(ConnectionState::Connected);
        *self.peer.lock() = Some(peer.clone());
        self.emit(ConnectionEvent::PeerConnected(peer));
    }

    pub fn report_error(&self, message: impl Into<String>) {
        self.emit(ConnectionEvent::Error(message.into()));
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Whether a client-role loop should try again after a failure
    pub fn should_reconnect(&self) -> bool {
        self.is_running() && self.auto_reconnect()
    }

    /// Sleep the reconnect interval, waking early on stop.
    /// Returns whether the session is still running.
    pub fn wait_backoff(&self) -> bool {
        let mut remaining = self.reconnect_interval;
        while !remaining.is_zero() && self.is_running() {
            let slice = remaining.min(BACKOFF_SLICE);
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        if self.is_running() {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Reconnect attempts made after a backoff
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.event_rx.clone()
    }

    fn emit(&self, event: ConnectionEvent) {
        // Drop the oldest notification rather than block an I/O thread
        if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
            let _ = self.event_rx.try_recv();
            let _ = self.event_tx.try_send(event);
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("running", &self.is_running())
            .field("state", &self.state())
            .field("auto_reconnect", &self.auto_reconnect())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_start_stop_idempotent() {
        let manager = ConnectionManager::new(true, Duration::from_secs(2));
        assert!(!manager.is_running());
        assert!(manager.start());
        assert!(!manager.start());
        assert!(manager.stop());
        assert!(!manager.stop());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_transitions_emit_events() {
        let manager = ConnectionManager::new(false, Duration::from_secs(2));
        let events = manager.events();

        manager.transition(ConnectionState::Connecting);
        manager.connected("127.0.0.1:5000");
        manager.transition(ConnectionState::Connected);
        manager.transition(ConnectionState::Disconnected);

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                ConnectionEvent::StateChanged {
                    from: ConnectionState::Idle,
                    to: ConnectionState::Connecting
                },
                ConnectionEvent::StateChanged {
                    from: ConnectionState::Connecting,
                    to: ConnectionState::Connected
                },
                ConnectionEvent::PeerConnected("127.0.0.1:5000".into()),
                ConnectionEvent::StateChanged {
                    from: ConnectionState::Connected,
                    to: ConnectionState::Disconnected
                },
            ]
        );
        assert_eq!(manager.peer(), None);
    }

    #[test]
    fn test_peer_tracked_while_connected() {
        let manager = ConnectionManager::new(false, Duration::from_secs(2));
        manager.connected("peer");
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.peer().as_deref(), Some("peer"));
    }

    #[test]
    fn test_should_reconnect_requires_running_and_policy() {
        let manager = ConnectionManager::new(true, Duration::from_millis(10));
        assert!(!manager.should_reconnect());
        manager.start();
        assert!(manager.should_reconnect());
        manager.set_auto_reconnect(false);
        assert!(!manager.should_reconnect());
    }

    #[test]
    fn test_backoff_interrupted_by_stop() {
        let manager = Arc::new(ConnectionManager::new(true, Duration::from_secs(30)));
        manager.start();

        let stopper = manager.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stopper.stop();
        });

        let started = Instant::now();
        assert!(!manager.wait_backoff());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(manager.reconnect_count(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_backoff_completes_while_running() {
        let manager = ConnectionManager::new(true, Duration::from_millis(60));
        manager.start();
        assert!(manager.wait_backoff());
        assert_eq!(manager.reconnect_count(), 1);
    }

    #[test]
    fn test_event_queue_never_blocks() {
        let manager = ConnectionManager::new(false, Duration::from_secs(1));
        for i in 0..1000 {
            manager.report_error(format!("error {i}"));
        }
        let events: Vec<_> = manager.events().try_iter().collect();
        assert_eq!(events.len(), 256);
        assert_eq!(events.last(), Some(&ConnectionEvent::Error("error 999".into())));
    }
}
