//! Synthetic NV21 camera for running without sensor hardware

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use super::source::FrameSource;
use crate::error::{AppError, Result};

struct PatternState {
    next_due: Instant,
    sequence: u64,
}

/// Moving luma gradient at a fixed frame rate
pub struct TestPatternCamera {
    resolution: Resolution,
    fps: u32,
    interval: Duration,
    state: Mutex<PatternState>,
}

impl TestPatternCamera {
    pub fn new(resolution: Resolution, fps: u32) -> Result<Self> {
        if resolution.width == 0 || resolution.height == 0 || resolution.height % 2 != 0 {
            return Err(AppError::ArgsError(format!(
                "Invalid test pattern resolution {}",
                resolution
            )));
        }
        let fps = fps.max(1);
        Ok(Self {
            resolution,
            fps,
            interval: Duration::from_secs(1) / fps,
            state: Mutex::new(PatternState {
                next_due: Instant::now(),
                sequence: 0,
            }),
        })
    }

    fn render(&self, sequence: u64) -> Bytes {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let shift = (sequence * 4) as usize;

        let mut buf = BytesMut::with_capacity(PixelFormat::Nv21.frame_size(self.resolution));
        for y in 0..height {
            for x in 0..width {
                buf.put_u8(((x + y + shift) & 0xFF) as u8);
            }
        }
        // Neutral chroma, interleaved V/U
        buf.put_bytes(128, width * height / 2);
        buf.freeze()
    }
}

impl FrameSource for TestPatternCamera {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn format(&self) -> PixelFormat {
        PixelFormat::Nv21
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn try_pop(&self) -> Result<Option<VideoFrame>> {
        let now = Instant::now();
        let sequence = {
            let mut state = self.state.lock();
            if now < state.next_due {
                return Ok(None);
            }
            state.next_due = now + self.interval;
            state.sequence += 1;
            state.sequence - 1
        };

        Ok(Some(VideoFrame::new(
            self.render(sequence),
            self.resolution,
            PixelFormat::Nv21,
            sequence,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paced_nv21_frames() {
        let camera = TestPatternCamera::new(Resolution::new(64, 32), 10).unwrap();

        let frame = camera.try_pop().unwrap().expect("first frame is due immediately");
        assert_eq!(frame.format, PixelFormat::Nv21);
        assert_eq!(frame.len(), 64 * 32 * 3 / 2);
        assert_eq!(frame.data()[64 * 32], 128);

        // Next frame is 100 ms away
        assert!(camera.try_pop().unwrap().is_none());
    }

    #[test]
    fn test_rejects_odd_height() {
        assert!(matches!(
            TestPatternCamera::new(Resolution::new(64, 31), 30),
            Err(AppError::ArgsError(_))
        ));
    }
}
