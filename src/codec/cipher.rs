//! Symmetric payload encryption
//!
//! AES-256 in CFB mode with a fresh random 16-byte IV per packet, keyed by
//! PBKDF2-HMAC-SHA256 over a password. There is no authentication tag: with
//! encryption alone, corrupted ciphertext decrypts to garbage audio without
//! any error. Enable the FEC stage to detect that.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;
use sha2::Sha256;

use crate::error::SecurityError;

/// Length of the prepended initialization vector
pub const IV_LEN: usize = 16;

/// Key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// Fixed key-derivation salt shared by both endpoints
pub const KDF_SALT: &[u8] = b"mpx_audio_salt_v1";

pub const KDF_ITERATIONS: u32 = 100_000;

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

#[derive(Clone)]
pub struct AudioCipher {
    key: [u8; KEY_LEN],
}

impl AudioCipher {
    /// Derive the key from a password. Deliberately slow; do it once per session.
    pub fn from_password(password: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        Self { key }
    }

    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// `iv ++ AES-256-CFB(data)`
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut out = Vec::with_capacity(IV_LEN + data.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(data);

        Aes256CfbEnc::new_from_slices(&self.key, &iv)
            .map_err(|_| SecurityError::CipherInit)?
            .encrypt(&mut out[IV_LEN..]);
        Ok(out)
    }

    /// Split off the IV and decrypt the remainder
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if data.len() < IV_LEN {
            return Err(SecurityError::PayloadTooShort(data.len()));
        }
        let (iv, ciphertext) = data.split_at(IV_LEN);
        let mut out = ciphertext.to_vec();

        Aes256CfbDec::new_from_slices(&self.key, iv)
            .map_err(|_| SecurityError::CipherInit)?
            .decrypt(&mut out);
        Ok(out)
    }
}

impl std::fmt::Debug for AudioCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCipher").finish_non_exhaustive()
    }
}
