//! Network transport and streaming sessions

pub mod connection;
#[cfg(feature = "receiver")]
pub mod receiver;
#[cfg(feature = "sender")]
pub mod sender;
pub mod tcp;
pub mod udp;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
#[cfg(feature = "receiver")]
pub use receiver::StreamReceiver;
#[cfg(feature = "sender")]
pub use sender::StreamSender;

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::NetworkError;

/// Bound on every blocking socket read so loops observe the stop flag
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolve `host:port` to the first usable address
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| NetworkError::ConnectionFailed(format!("{}:{}: no address", host, port)))
}

/// `WouldBlock` and `TimedOut` both mean "nothing yet"
#[inline]
pub(crate) fn is_timeout(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(kind, WouldBlock | TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_literal() {
        let addr = resolve("127.0.0.1", 5000).unwrap();
        assert_eq!(addr, "127.0.0.1:5000".parse().unwrap());
    }

    #[test]
    fn test_timeout_kinds() {
        assert!(is_timeout(std::io::ErrorKind::WouldBlock));
        assert!(is_timeout(std::io::ErrorKind::TimedOut));
        assert!(!is_timeout(std::io::ErrorKind::ConnectionReset));
    }
}
