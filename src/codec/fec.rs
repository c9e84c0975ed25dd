//! Forward error *detection*
//!
//! Appends a 16-byte MD5 digest of the payload. This is a non-cryptographic
//! integrity check with no correction capability: a mismatching packet is
//! dropped by the caller, never repaired.

use md5::{Digest, Md5};

/// Length of the appended integrity tag
pub const CHECKSUM_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct FecCodec;

impl FecCodec {
    pub fn new() -> Self {
        Self
    }

    /// `payload ++ checksum(payload)`
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
        out.extend_from_slice(payload);
        out.extend_from_slice(&Md5::digest(payload));
        out
    }

    /// Split off the trailing checksum and validate it.
    ///
    /// Input shorter than the checksum is returned unchanged and invalid.
    pub fn decode<'a>(&self, data: &'a [u8]) -> (&'a [u8], bool) {
        if data.len() < CHECKSUM_LEN {
            return (data, false);
        }
        let (payload, received) = data.split_at(data.len() - CHECKSUM_LEN);
        let valid = Md5::digest(payload).as_slice() == received;
        (payload, valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let fec = FecCodec::new();
        let payload = b"mpx composite block";
        let encoded = fec.encode(payload);
        assert_eq!(encoded.len(), payload.len() + CHECKSUM_LEN);
        assert_eq!(fec.decode(&encoded), (&payload[..], true));
    }

    #[test]
    fn test_empty_payload() {
        let fec = FecCodec::new();
        let encoded = fec.encode(&[]);
        assert_eq!(encoded.len(), CHECKSUM_LEN);
        assert_eq!(fec.decode(&encoded), (&[][..], true));
    }

    #[test]
    fn test_detects_flipped_bits() {
        let fec = FecCodec::new();
        let encoded = fec.encode(&[0x55; 64]);
        for byte in [0, 31, 63, 64, 79] {
            let mut corrupted = encoded.clone();
            corrupted[byte] ^= 0x01;
            assert!(!fec.decode(&corrupted).1, "flip at byte {byte} went undetected");
        }
    }

    #[test]
    fn test_short_input_is_invalid() {
        let fec = FecCodec::new();
        let (payload, valid) = fec.decode(&[1, 2, 3]);
        assert_eq!(payload, &[1, 2, 3]);
        assert!(!valid);
    }
}
