//! Video capture, encode and push pipeline
//!
//! The camera and hardware encoder are consumed through the [`FrameSource`]
//! and [`VideoEncoder`] traits; [`StreamPipeline`] moves frames between them
//! and hands encoded access units to the active peer session.

pub mod annexb;
pub mod format;
pub mod frame;
pub mod pipeline;
pub mod replay;
pub mod source;
pub mod test_pattern;

pub use format::{PixelFormat, Resolution};
pub use frame::{EncodedBatch, VideoFrame};
pub use pipeline::{MediaSink, PipelineContext, PipelineStats, StreamPipeline};
pub use replay::{ReplayEncoder, ReplayEncoderFactory};
pub use source::{EncoderConfig, EncoderFactory, FrameSource, VideoEncoder, VideoType};
pub use test_pattern::TestPatternCamera;
