//! Secure framing codec
//!
//! Two independently toggleable stages applied in a fixed order:
//! encode = FEC then cipher, decode = cipher then FEC. Both endpoints must
//! agree on which stages are enabled; a mismatch silently corrupts audio.

pub mod auth;
pub mod cipher;
pub mod fec;
pub mod pipeline;

pub use auth::TokenAuthenticator;
pub use cipher::AudioCipher;
pub use fec::FecCodec;
pub use pipeline::FramingPipeline;
