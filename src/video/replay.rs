//! Encoder stand-in that replays a recorded Annex-B elementary stream
//!
//! Each captured frame pushed in releases the next recorded access unit, so the
//! output is paced by the camera like a real hardware encoder. The recording
//! is looped; its first access unit must carry the parameter sets.

use bytes::Bytes;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::info;

use super::annexb::{is_keyframe, is_vcl, split_nal_units};
use super::frame::{EncodedBatch, VideoFrame};
use super::source::{EncoderConfig, EncoderFactory, VideoEncoder};
use crate::config::VideoCodec;
use crate::error::{AppError, Result};

/// Replays recorded access units, one per pushed frame
pub struct ReplayEncoder {
    access_units: Vec<EncodedBatch>,
    next: usize,
    ready: VecDeque<EncodedBatch>,
}

impl ReplayEncoder {
    pub fn open(path: &Path, codec: VideoCodec) -> Result<Self> {
        let data = std::fs::read(path)?;
        let encoder = Self::from_bytes(Bytes::from(data), codec)?;
        info!(
            "Loaded {} {} access units from {}",
            encoder.access_units.len(),
            codec,
            path.display()
        );
        Ok(encoder)
    }

    /// Group NAL units into access units: every picture NAL closes one
    ///
    /// One slice per picture is assumed, which holds for the device encoder's output.
    pub fn from_bytes(data: Bytes, codec: VideoCodec) -> Result<Self> {
        let mut access_units = Vec::new();
        let mut current = EncodedBatch::default();
        let mut seen_keyframe = false;

        for nal in split_nal_units(&data) {
            current.push(data.slice_ref(nal.with_start_code));
            if is_vcl(codec, nal.payload) {
                seen_keyframe |= is_keyframe(codec, nal.payload);
                access_units.push(std::mem::take(&mut current));
            }
        }

        if access_units.is_empty() {
            return Err(AppError::ArgsError(format!(
                "No {} pictures found in stream",
                codec
            )));
        }
        if !seen_keyframe {
            return Err(AppError::ArgsError(format!(
                "Stream has no {} keyframe",
                codec
            )));
        }

        Ok(Self {
            access_units,
            next: 0,
            ready: VecDeque::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.access_units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.access_units.is_empty()
    }
}

impl VideoEncoder for ReplayEncoder {
    fn push(&mut self, _frame: &VideoFrame) -> Result<()> {
        let au = self.access_units[self.next].clone();
        self.next = (self.next + 1) % self.access_units.len();
        self.ready.push_back(au);
        Ok(())
    }

    fn try_pop(&mut self) -> Result<Option<EncodedBatch>> {
        Ok(self.ready.pop_front())
    }
}

/// Opens a [`ReplayEncoder`] over the same file on every start
pub struct ReplayEncoderFactory {
    path: PathBuf,
}

impl ReplayEncoderFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EncoderFactory for ReplayEncoderFactory {
    fn create(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>> {
        info!(
            "Opening replay encoder: {} {} @ {} fps, gop {}, {} bps",
            config.video_type, config.resolution, config.fps, config.gop, config.bitrate
        );
        Ok(Box::new(ReplayEncoder::open(
            &self.path,
            config.video_type.codec(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::{PixelFormat, Resolution};

    fn h264_stream() -> Bytes {
        Bytes::from_static(&[
            0, 0, 0, 1, 0x67, 0x4D, // SPS
            0, 0, 0, 1, 0x68, 0xEE, // PPS
            0, 0, 0, 1, 0x65, 0x88, // IDR
            0, 0, 0, 1, 0x41, 0x9A, // P
            0, 0, 0, 1, 0x41, 0x9B, // P
        ])
    }

    fn frame() -> VideoFrame {
        VideoFrame::new(Bytes::new(), Resolution::new(64, 32), PixelFormat::Nv21, 0)
    }

    #[test]
    fn test_groups_parameter_sets_with_keyframe() {
        let mut encoder = ReplayEncoder::from_bytes(h264_stream(), VideoCodec::H264).unwrap();
        assert_eq!(encoder.len(), 3);

        assert!(encoder.try_pop().unwrap().is_none());
        encoder.push(&frame()).unwrap();
        let first = encoder.try_pop().unwrap().unwrap();
        assert_eq!(first.len(), 3);

        encoder.push(&frame()).unwrap();
        encoder.push(&frame()).unwrap();
        encoder.push(&frame()).unwrap();
        assert_eq!(encoder.try_pop().unwrap().unwrap().len(), 1);
        assert_eq!(encoder.try_pop().unwrap().unwrap().len(), 1);
        // Wrapped around to the keyframe access unit
        assert_eq!(encoder.try_pop().unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_stream_without_keyframe() {
        let data = Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9A]);
        assert!(matches!(
            ReplayEncoder::from_bytes(data, VideoCodec::H264),
            Err(AppError::ArgsError(_))
        ));
        assert!(ReplayEncoder::from_bytes(Bytes::new(), VideoCodec::H264).is_err());
    }
}
