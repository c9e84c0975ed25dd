//! Real-time signal processing on the per-block hot path

pub mod conditioner;
pub mod meter;
pub mod spectrum;

pub use conditioner::SignalConditioner;
pub use meter::{LevelMeters, LevelSnapshot, PeakMeter};
pub use spectrum::SpectrumAnalyzer;
