//! HTTP control and status surface

pub mod handlers;
pub mod server;

pub use server::{ControlHandle, ControlServer};

use serde::{Deserialize, Serialize};

use crate::dsp::meter::LevelSnapshot;
use crate::network::connection::ConnectionState;
use crate::protocol::Protocol;
use crate::session::{Direction, SessionStats};

/// Static and live description of a running stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub direction: Direction,
    /// Session started and not yet stopped
    pub running: bool,
    pub state: ConnectionState,
    /// Connected peer, if any
    pub peer: Option<String>,
    pub protocol: Protocol,
    /// Bound local address, or the configured `host:port` before binding
    pub address: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per block
    pub block_size: usize,
    /// Live AGC and limiter toggles
    pub processing: ProcessingState,
    /// Integrity tag on the wire
    pub fec: bool,
    /// Payload encryption on the wire
    pub encryption: bool,
    pub auto_reconnect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingState {
    pub agc: bool,
    pub limiter: bool,
}

/// Partial update of the processing toggles
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ProcessingUpdate {
    pub agc: Option<bool>,
    pub limiter: Option<bool>,
}

/// What the control surface can do to a session
pub trait StreamControl: Send + Sync {
    fn status(&self) -> StreamStatus;
    fn stats(&self) -> SessionStats;
    fn levels(&self) -> LevelSnapshot;
    fn set_processing(&self, update: ProcessingUpdate) -> ProcessingState;
    fn stop_stream(&self);
}
