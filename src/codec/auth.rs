//! Time-boxed token authentication for out-of-band session setup
//!
//! Not applied per packet.

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Accepted clock skew between token issue and verification, in seconds
pub const TOKEN_TOLERANCE_SECS: f64 = 5.0;

#[derive(Clone, Default)]
pub struct TokenAuthenticator {
    shared_secret: Option<String>,
}

impl TokenAuthenticator {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: Some(shared_secret.into()),
        }
    }

    /// Authenticator that issues empty tokens and accepts everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared_secret.is_some()
    }

    /// Hex SHA-256 of `"{timestamp}:{secret}"`
    pub fn generate_token(&self, timestamp: f64) -> String {
        match &self.shared_secret {
            Some(secret) => {
                let message = format!("{:?}:{}", timestamp, secret);
                hex::encode(Sha256::digest(message.as_bytes()))
            }
            None => String::new(),
        }
    }

    /// Check a token against the timestamp it claims, as seen at `now`
    pub fn verify_token_at(&self, token: &str, timestamp: f64, now: f64) -> bool {
        if !self.is_enabled() {
            return true;
        }
        if (now - timestamp).abs() > TOKEN_TOLERANCE_SECS {
            return false;
        }
        self.generate_token(timestamp) == token
    }

    pub fn verify_token(&self, token: &str, timestamp: f64) -> bool {
        self.verify_token_at(token, timestamp, unix_now())
    }
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Seconds since the Unix epoch
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
