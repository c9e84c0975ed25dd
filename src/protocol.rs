//! Wire protocol definitions
//!
//! TCP frames: `sequence (u32 BE) | length (u32 BE) | payload[length]`.
//! UDP datagrams: `sequence (u32 BE) | payload`, the datagram boundary
//! standing in for the length field.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::FramingError;

/// Size of the sequence field
pub const SEQUENCE_LEN: usize = 4;

/// Size of the TCP frame header (sequence + length)
pub const TCP_HEADER_LEN: usize = 8;

/// Largest TCP payload accepted before the stream is considered corrupt
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Receive buffer size for one UDP datagram
pub const MAX_DATAGRAM_LEN: usize = 65536;

/// Transport selected for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// One sequenced wire payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    /// Serialize as a length-prefixed TCP frame
    pub fn encode_tcp(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TCP_HEADER_LEN + self.payload.len());
        buf.put_u32(self.sequence);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Serialize as a single UDP datagram
    pub fn encode_udp(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SEQUENCE_LEN + self.payload.len());
        buf.put_u32(self.sequence);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse one received datagram
    pub fn parse_udp(datagram: &[u8]) -> Result<Self, FramingError> {
        if datagram.len() < SEQUENCE_LEN {
            return Err(FramingError::ShortDatagram(datagram.len()));
        }
        let mut buf = datagram;
        let sequence = buf.get_u32();
        Ok(Self {
            sequence,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Length of this packet on the wire for the given transport
    pub fn wire_len(&self, protocol: Protocol) -> usize {
        match protocol {
            Protocol::Tcp => TCP_HEADER_LEN + self.payload.len(),
            Protocol::Udp => SEQUENCE_LEN + self.payload.len(),
        }
    }
}

/// Incremental TCP frame decoder
///
/// Bytes are fed as they arrive, in chunks of any size; complete frames are
/// pulled out with [`next_frame`](Self::next_frame). A short read is never an
/// error, the decoder simply waits for more input.
#[derive(Debug)]
pub struct TcpFrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl TcpFrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(64 * 1024),
            max_frame_len,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame.
    ///
    /// A length above the limit means the stream is out of sync, which is
    /// unrecoverable: the caller must close the connection.
    pub fn next_frame(&mut self) -> Result<Option<Packet>, FramingError> {
        if self.buf.len() < TCP_HEADER_LEN {
            return Ok(None);
        }

        let mut header = &self.buf[..TCP_HEADER_LEN];
        let sequence = header.get_u32();
        let length = header.get_u32() as usize;

        if length > self.max_frame_len {
            return Err(FramingError::FrameTooLarge(length));
        }
        if self.buf.len() < TCP_HEADER_LEN + length {
            self.buf.reserve(TCP_HEADER_LEN + length - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(TCP_HEADER_LEN);
        let payload = self.buf.split_to(length).freeze();
        Ok(Some(Packet { sequence, payload }))
    }

    /// Bytes held that do not yet form a complete frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for TcpFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_header_layout() {
        let packet = Packet::new(0x01020304, vec![0xAA, 0xBB]);
        let frame = packet.encode_tcp();
        assert_eq!(&frame[..], &[1, 2, 3, 4, 0, 0, 0, 2, 0xAA, 0xBB]);
        assert_eq!(packet.wire_len(Protocol::Tcp), frame.len());
    }

    #[test]
    fn test_udp_layout_and_parse() {
        let packet = Packet::new(7, vec![1, 2, 3]);
        let datagram = packet.encode_udp();
        assert_eq!(&datagram[..], &[0, 0, 0, 7, 1, 2, 3]);
        assert_eq!(Packet::parse_udp(&datagram).unwrap(), packet);
    }

    #[test]
    fn test_udp_header_only_is_empty_payload() {
        let packet = Packet::parse_udp(&[0, 0, 1, 0]).unwrap();
        assert_eq!(packet.sequence, 256);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_udp_short_datagram_rejected() {
        assert_eq!(
            Packet::parse_udp(&[0, 1, 2]),
            Err(FramingError::ShortDatagram(3))
        );
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let first = Packet::new(1, vec![9u8; 300]);
        let second = Packet::new(2, Vec::new());
        let mut stream = first.encode_tcp().to_vec();
        stream.extend_from_slice(&second.encode_tcp());

        let mut decoder = TcpFrameDecoder::new();
        let mut out = Vec::new();
        for byte in stream {
            decoder.feed(&[byte]);
            while let Some(packet) = decoder.next_frame().unwrap() {
                out.push(packet);
            }
        }
        assert_eq!(out, vec![first, second]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_waits_for_full_payload() {
        let frame = Packet::new(5, vec![1u8; 16]).encode_tcp();
        let mut decoder = TcpFrameDecoder::new();
        decoder.feed(&frame[..TCP_HEADER_LEN + 4]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.feed(&frame[TCP_HEADER_LEN + 4..]);
        assert_eq!(decoder.next_frame().unwrap().map(|p| p.sequence), Some(5));
    }

    #[test]
    fn test_decoder_rejects_oversized_length() {
        let mut decoder = TcpFrameDecoder::with_max_frame_len(1024);
        decoder.feed(&[0, 0, 0, 1, 0, 0, 0x10, 0]);
        assert_eq!(decoder.next_frame(), Err(FramingError::FrameTooLarge(4096)));
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("TCP".parse::<Protocol>(), Ok(Protocol::Tcp));
        assert_eq!("udp".parse::<Protocol>(), Ok(Protocol::Udp));
        assert!("sctp".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }
}
