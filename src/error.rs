//! Error types for the audio link

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Secure framing codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// FEC checksum did not match; the packet must be dropped
    #[error("Integrity check failed")]
    IntegrityFailure,

    #[error("Payload too short: {0} bytes")]
    PayloadTooShort(usize),

    #[error("Cipher initialization failed")]
    CipherInit,
}

/// Wire framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Datagram too short: {0} bytes")]
    ShortDatagram(usize),

    #[error("Frame length {0} exceeds limit")]
    FrameTooLarge(usize),

    /// Byte count is not a multiple of channels x sample width
    #[error("Payload of {len} bytes does not fit {channels} channels of {width}-byte samples")]
    Misaligned {
        len: usize,
        channels: u16,
        width: usize,
    },
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Timeout")]
    Timeout,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
