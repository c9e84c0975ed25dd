//! Fixed-order wire payload pipeline

use crate::codec::cipher::AudioCipher;
use crate::codec::fec::FecCodec;
use crate::config::SecurityConfig;
use crate::error::SecurityError;
use crate::stage::Stage;

/// FEC and cipher stages composed in the only valid order
#[derive(Debug, Clone, Default)]
pub struct FramingPipeline {
    fec: Stage<FecCodec>,
    cipher: Stage<AudioCipher>,
}

impl FramingPipeline {
    pub fn new(fec: bool, cipher: Option<AudioCipher>) -> Self {
        Self {
            fec: if fec {
                Stage::Active(FecCodec::new())
            } else {
                Stage::Identity
            },
            cipher: Stage::from_option(cipher),
        }
    }

    /// Build from configuration, deriving the cipher key if encryption is on
    pub fn from_config(config: &SecurityConfig) -> Self {
        let cipher = config
            .encryption
            .then(|| AudioCipher::from_password(&config.password));
        Self::new(config.fec, cipher)
    }

    /// Passthrough pipeline
    pub fn plain() -> Self {
        Self::default()
    }

    /// PCM bytes to wire payload: FEC-encode, then encrypt
    pub fn encode(&self, pcm: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let protected = match &self.fec {
            Stage::Active(fec) => fec.encode(pcm),
            Stage::Identity => pcm.to_vec(),
        };
        match &self.cipher {
            Stage::Active(cipher) => cipher.encrypt(&protected),
            Stage::Identity => Ok(protected),
        }
    }

    /// Wire payload to PCM bytes: decrypt, then validate the FEC checksum
    pub fn decode(&self, wire: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let plain = match &self.cipher {
            Stage::Active(cipher) => cipher.decrypt(wire)?,
            Stage::Identity => wire.to_vec(),
        };
        match &self.fec {
            Stage::Active(fec) => {
                let (payload, valid) = fec.decode(&plain);
                if valid {
                    Ok(payload.to_vec())
                } else {
                    Err(SecurityError::IntegrityFailure)
                }
            }
            Stage::Identity => Ok(plain),
        }
    }

    pub fn fec_enabled(&self) -> bool {
        self.fec.is_active()
    }

    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_active()
    }

    /// Bytes added on top of the PCM payload
    pub fn overhead(&self) -> usize {
        let fec = if self.fec_enabled() {
            crate::codec::fec::CHECKSUM_LEN
        } else {
            0
        };
        let iv = if self.encryption_enabled() {
            crate::codec::cipher::IV_LEN
        } else {
            0
        };
        fec + iv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cipher::{IV_LEN, KEY_LEN};
    use crate::codec::fec::CHECKSUM_LEN;

    fn cipher() -> AudioCipher {
        AudioCipher::from_key([3u8; KEY_LEN])
    }

    #[test]
    fn test_plain_is_passthrough() {
        let pipeline = FramingPipeline::plain();
        let data = vec![1u8, 2, 3, 4];
        assert_eq!(pipeline.encode(&data).unwrap(), data);
        assert_eq!(pipeline.decode(&data).unwrap(), data);
        assert_eq!(pipeline.overhead(), 0);
    }

    #[test]
    fn test_full_pipeline_roundtrip() {
        let pipeline = FramingPipeline::new(true, Some(cipher()));
        let data: Vec<u8> = (0..2048u32).map(|i| (i * 7) as u8).collect();
        let wire = pipeline.encode(&data).unwrap();
        assert_eq!(wire.len(), data.len() + CHECKSUM_LEN + IV_LEN);
        assert_eq!(pipeline.overhead(), CHECKSUM_LEN + IV_LEN);
        assert_eq!(pipeline.decode(&wire).unwrap(), data);
    }

    #[test]
    fn test_order_is_fec_inside_cipher() {
        let pipeline = FramingPipeline::new(true, Some(cipher()));
        let wire = pipeline.encode(b"payload").unwrap();

        // Decrypting by hand must expose payload ++ checksum
        let inner = cipher().decrypt(&wire).unwrap();
        let (payload, valid) = FecCodec::new().decode(&inner);
        assert!(valid);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_corruption_detected_when_both_enabled() {
        let pipeline = FramingPipeline::new(true, Some(cipher()));
        let mut wire = pipeline.encode(&[9u8; 256]).unwrap();
        wire[IV_LEN + 10] ^= 0x80;
        assert_eq!(pipeline.decode(&wire), Err(SecurityError::IntegrityFailure));
    }

    #[test]
    fn test_corruption_undetected_with_cipher_only() {
        let pipeline = FramingPipeline::new(false, Some(cipher()));
        let data = vec![9u8; 256];
        let mut wire = pipeline.encode(&data).unwrap();
        wire[IV_LEN + 10] ^= 0x80;
        let decoded = pipeline.decode(&wire).unwrap();
        assert_eq!(decoded.len(), data.len());
        assert_ne!(decoded, data);
    }

    #[test]
    fn test_mismatched_stages_fail_integrity() {
        let sender = FramingPipeline::new(false, None);
        let receiver = FramingPipeline::new(true, None);
        let wire = sender.encode(&[0u8; 64]).unwrap();
        assert_eq!(receiver.decode(&wire), Err(SecurityError::IntegrityFailure));
    }
}
