//! # mpx-link
//!
//! Low-latency point-to-point PCM and FM multiplex (MPX) audio link.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── SENDER ─────────────────────────────┐
//! │  ┌─────────────┐   ┌─────────────────┐   ┌──────────────────┐   │
//! │  │ AudioCapture│──▶│SignalConditioner│──▶│   LevelMeters    │   │
//! │  │ (cpal)      │   │ AGC → limiter   │   │ VU/peak/spectrum │   │
//! │  └─────────────┘   └────────┬────────┘   └──────────────────┘   │
//! │                             ▼ bounded send queue                │
//! │   ┌──────────┐   ┌─────────────────────┐   ┌────────────────┐   │
//! │   │ pcm      │──▶│ FramingPipeline     │──▶│ Packet framer  │   │
//! │   │ encode   │   │ MD5 FEC → AES-CFB   │   │ seq [+len]     │   │
//! │   └──────────┘   └─────────────────────┘   └───────┬────────┘   │
//! └────────────────────────────────────────────────────┼────────────┘
//!                                    TCP (server) / UDP │
//! ┌────────────────────────────── RECEIVER ────────────┼────────────┐
//! │   ┌────────────────┐   ┌─────────────────────┐   ┌─▼─────────┐  │
//! │   │ pcm decode     │◀──│ FramingPipeline     │◀──│ Packet    │  │
//! │   │                │   │ decrypt → verify    │   │ parser    │  │
//! │   └───────┬────────┘   └─────────────────────┘   └─────┬─────┘  │
//! │           ▼                                            ▼        │
//! │   ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐   │
//! │   │ JitterBuffer │──▶│SignalConditioner │──▶│ AudioPlayback │   │
//! │   └──────────────┘   └──────────────────┘   └───────────────┘   │
//! │        StreamMonitor · ConnectionManager · control HTTP         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod control;
pub mod dsp;
pub mod error;
pub mod mixer;
pub mod monitor;
pub mod network;
pub mod protocol;
pub mod session;
pub mod stage;

pub use error::{Error, Result};
