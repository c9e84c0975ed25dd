//! Blocking TCP transport with bounded timeouts

use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, NetworkError};
use crate::network::{is_timeout, READ_TIMEOUT};
use crate::protocol::{Packet, TcpFrameDecoder};

/// Poll interval of the non-blocking accept loop
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Longest single connect attempt between stop-flag checks
const CONNECT_SLICE: Duration = Duration::from_millis(250);

/// A peer that stops reading for this long is treated as gone
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 64 * 1024;

/// Bind a non-blocking listener with address reuse
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", addr, e));

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SocketProtocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    Ok(socket.into())
}

/// Wait up to `timeout` for one client.
///
/// Returns `Ok(None)` on timeout or as soon as `running` is cleared.
pub fn accept_timeout(
    listener: &TcpListener,
    timeout: Duration,
    running: &AtomicBool,
) -> Result<Option<(TcpStream, SocketAddr)>, NetworkError> {
    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                configure_stream(&stream)
                    .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                return Ok(Some((stream, peer)));
            }
            Err(e) if is_timeout(e.kind()) => {
                if !running.load(Ordering::SeqCst) || Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => return Err(NetworkError::ConnectionFailed(e.to_string())),
        }
    }
}

/// Dial with a bounded connect timeout.
///
/// The attempt is made in short slices so a cleared `running` flag aborts a
/// pending connect within one slice instead of after the full timeout.
pub fn connect(
    addr: SocketAddr,
    timeout: Duration,
    running: &AtomicBool,
) -> Result<TcpStream, NetworkError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(NetworkError::Timeout);
        }
        if !running.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionFailed(format!("{}: stopped", addr)));
        }

        match TcpStream::connect_timeout(&addr, remaining.min(CONNECT_SLICE)) {
            Ok(stream) => {
                configure_stream(&stream)
                    .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                return Ok(stream);
            }
            Err(e) if is_timeout(e.kind()) => continue,
            Err(e) => return Err(NetworkError::ConnectionFailed(format!("{}: {}", addr, e))),
        }
    }
}

fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    // Accepted sockets inherit O_NONBLOCK from the listener on some platforms
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    Ok(())
}

/// Write one frame in full
pub fn write_packet(stream: &mut TcpStream, packet: &Packet) -> Result<usize, NetworkError> {
    let frame = packet.encode_tcp();
    stream
        .write_all(&frame)
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(frame.len())
}

/// Reassembles frames from a TCP stream across partial reads
pub struct FrameReader {
    stream: TcpStream,
    decoder: TcpFrameDecoder,
    chunk: Vec<u8>,
}

impl FrameReader {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            decoder: TcpFrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK],
        }
    }

    /// Next complete frame.
    ///
    /// `Ok(None)` means the read timed out with no complete frame; call again.
    /// A zero-length read is [`NetworkError::PeerClosed`]. Framing errors
    /// leave the stream unusable.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, Error> {
        loop {
            if let Some(packet) = self.decoder.next_frame()? {
                return Ok(Some(packet));
            }
            match self.stream.read(&mut self.chunk) {
                Ok(0) => return Err(NetworkError::PeerClosed.into()),
                Ok(n) => self.decoder.feed(&self.chunk[..n]),
                Err(e) if is_timeout(e.kind()) => return Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
            }
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Close both directions; the reader is consumed
    pub fn shutdown(self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
