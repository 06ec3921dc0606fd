//! Audio input for the optional Opus track

pub mod source;

pub use source::{AudioSource, OpusFrame, OPUS_CHANNELS, OPUS_SAMPLE_RATE};
