//! Capture source and hardware encoder seams
//!
//! The camera and the encoder are external collaborators; the pipeline only
//! needs non-blocking pops and pushes from them.

use std::fmt;

use super::format::{PixelFormat, Resolution};
use super::frame::{EncodedBatch, VideoFrame};
use crate::config::{RateControl, VideoCodec};
use crate::error::Result;

/// Camera channel feeding the pipeline
pub trait FrameSource: Send + Sync {
    fn resolution(&self) -> Resolution;

    fn format(&self) -> PixelFormat;

    fn fps(&self) -> u32;

    /// Non-blocking pop; `Ok(None)` when no frame is ready
    fn try_pop(&self) -> Result<Option<VideoFrame>>;

    /// Hand a consumed frame back to the source
    fn release(&self, frame: VideoFrame) {
        drop(frame);
    }
}

/// Encoder stream type: codec plus rate-control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoType {
    H264Cbr,
    H264Vbr,
    H265Cbr,
    H265Vbr,
}

impl VideoType {
    pub fn new(codec: VideoCodec, rc: RateControl) -> Self {
        match (codec, rc) {
            (VideoCodec::H264, RateControl::Cbr) => VideoType::H264Cbr,
            (VideoCodec::H264, RateControl::Vbr) => VideoType::H264Vbr,
            (VideoCodec::H265, RateControl::Cbr) => VideoType::H265Cbr,
            (VideoCodec::H265, RateControl::Vbr) => VideoType::H265Vbr,
        }
    }

    pub fn codec(&self) -> VideoCodec {
        match self {
            VideoType::H264Cbr | VideoType::H264Vbr => VideoCodec::H264,
            VideoType::H265Cbr | VideoType::H265Vbr => VideoCodec::H265,
        }
    }

    pub fn rate_control(&self) -> RateControl {
        match self {
            VideoType::H264Cbr | VideoType::H265Cbr => RateControl::Cbr,
            VideoType::H264Vbr | VideoType::H265Vbr => RateControl::Vbr,
        }
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.codec(), self.rate_control())
    }
}

/// Parameters the encoder is opened with
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub resolution: Resolution,
    pub input_format: PixelFormat,
    pub video_type: VideoType,
    pub fps: u32,
    /// Keyframe interval in frames
    pub gop: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
}

/// Hardware encoder channel
pub trait VideoEncoder: Send {
    /// Queue a captured frame for encoding
    fn push(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Non-blocking pop of completed units; `Ok(None)` when nothing is ready
    fn try_pop(&mut self) -> Result<Option<EncodedBatch>>;

    /// Return a consumed batch's buffers to the encoder
    fn release(&mut self, batch: EncodedBatch) {
        drop(batch);
    }
}

/// Opens encoders; called on every `start()`
pub trait EncoderFactory: Send + Sync {
    fn create(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_type_covers_all_pairs() {
        for codec in [VideoCodec::H264, VideoCodec::H265] {
            for rc in [RateControl::Cbr, RateControl::Vbr] {
                let vt = VideoType::new(codec, rc);
                assert_eq!(vt.codec(), codec);
                assert_eq!(vt.rate_control(), rc);
            }
        }
        assert_eq!(
            VideoType::new(VideoCodec::H265, RateControl::Vbr).to_string(),
            "H.265 VBR"
        );
    }
}
