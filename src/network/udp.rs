//! Connectionless UDP transport
//!
//! There is no handshake: "connected" means the socket is bound (receiver)
//! or has its target set (sender). Loss only shows up as sequence gaps.

use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::{Error, NetworkError};
use crate::network::{is_timeout, READ_TIMEOUT};
use crate::protocol::Packet;

/// Bind the receiving socket with address reuse and a bounded read timeout
pub fn bind_receiver(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", addr, e));

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(SocketProtocol::UDP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(READ_TIMEOUT)).map_err(bind_err)?;
    Ok(socket)
}

/// Ephemeral socket with its default destination set to `target`
pub fn connect_sender(target: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let local: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket =
        UdpSocket::bind(local).map_err(|e| NetworkError::BindFailed(format!("{}: {}", local, e)))?;
    socket
        .connect(target)
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", target, e)))?;
    Ok(socket)
}

/// Send one packet as a single datagram
pub fn send_packet(socket: &UdpSocket, packet: &Packet) -> Result<usize, NetworkError> {
    let datagram = packet.encode_udp();
    let sent = socket
        .send(&datagram)
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    if sent != datagram.len() {
        return Err(NetworkError::SendFailed(format!(
            "short datagram write: {} of {} bytes",
            sent,
            datagram.len()
        )));
    }
    Ok(sent)
}

/// Receive one datagram.
///
/// `Ok(None)` on read timeout. Datagrams too short to hold a sequence are
/// returned as a framing error so the caller can drop and continue.
pub fn recv_packet(socket: &UdpSocket, buf: &mut [u8]) -> Result<Option<(Packet, usize)>, Error> {
    match socket.recv_from(buf) {
        Ok((len, _from)) => {
            let packet = Packet::parse_udp(&buf[..len])?;
            Ok(Some((packet, len)))
        }
        Err(e) if is_timeout(e.kind()) => Ok(None),
        Err(e) => Err(NetworkError::ReceiveFailed(e.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FramingError;
    use crate::protocol::MAX_DATAGRAM_LEN;

    #[test]
    fn test_datagram_roundtrip() {
        let receiver = bind_receiver("127.0.0.1:0".parse().unwrap()).unwrap();
        let sender = connect_sender(receiver.local_addr().unwrap()).unwrap();

        let packet = Packet::new(9, vec![5u8; 512]);
        assert_eq!(send_packet(&sender, &packet).unwrap(), 516);

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (received, len) = recv_packet(&receiver, &mut buf).unwrap().unwrap();
        assert_eq!(received, packet);
        assert_eq!(len, 516);
    }

    #[test]
    fn test_short_datagram_is_framing_error() {
        let receiver = bind_receiver("127.0.0.1:0".parse().unwrap()).unwrap();
        let sender = connect_sender(receiver.local_addr().unwrap()).unwrap();
        sender.send(&[1, 2]).unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        assert!(matches!(
            recv_packet(&receiver, &mut buf),
            Err(Error::Framing(FramingError::ShortDatagram(2)))
        ));
    }
}
