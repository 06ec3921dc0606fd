//! Audio recorder seam
//!
//! The recorder and its Opus encoder live outside this crate; the pipeline
//! drains already-encoded packets from it.

use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;

/// Sample rate of the Opus payload (RTP clock)
pub const OPUS_SAMPLE_RATE: u32 = 48000;

/// Channel count advertised for the Opus payload
pub const OPUS_CHANNELS: u16 = 2;

/// One encoded Opus packet
#[derive(Debug, Clone)]
pub struct OpusFrame {
    pub data: Bytes,
    /// Playback duration of the packet
    pub duration: Duration,
    /// Capture sequence number
    pub sequence: u64,
}

impl OpusFrame {
    pub fn new(data: Bytes, duration: Duration, sequence: u64) -> Self {
        Self {
            data,
            duration,
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Bound audio recorder
pub trait AudioSource: Send + Sync {
    /// Drop anything buffered so a new session starts from live audio
    fn reset(&self) -> Result<()>;

    /// Non-blocking pop of the next encoded packet
    fn try_pop(&self) -> Result<Option<OpusFrame>>;
}
