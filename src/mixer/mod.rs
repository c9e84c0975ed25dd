//! Multi-stream mixing and routing

pub mod router;
pub mod stream;

pub use router::{MultiStreamManager, Router};
pub use stream::{Mixer, MixerStream, StreamInfo};
