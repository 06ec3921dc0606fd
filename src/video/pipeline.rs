//! Capture → encode → push worker
//!
//! ```text
//! FrameSource ──try_pop──> VideoEncoder ──try_pop──> EncodedBatch
//!                                                     │ concat + pts
//!                                                     v
//!                                        MediaSink::push_video_frame
//! ```
//!
//! The worker runs on the blocking pool and owns its [`PipelineContext`]
//! exclusively. It is stopped by clearing its run flag; the flag is checked
//! at the top of every iteration.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::frame::EncodedBatch;
use super::source::{FrameSource, VideoEncoder};
use crate::audio::{AudioSource, OpusFrame};
use crate::error::{AppError, Result};
use crate::events::{EventBus, StreamEvent};
use crate::utils::LogThrottler;
use crate::{error_throttled, warn_throttled};

/// Sleep while no viewer has an open video track
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Sleep when neither the camera nor the encoder had anything ready
const STARVED_SLEEP: Duration = Duration::from_millis(2);

/// RTP video clock ticks per millisecond
const TICKS_PER_MS: u64 = 90;

/// Where encoded media goes; implemented by the peer session
#[async_trait]
pub trait MediaSink: Send + Sync {
    fn is_video_track_open(&self) -> bool;

    fn is_audio_track_open(&self) -> bool;

    async fn push_video_frame(&self, data: Bytes, timestamp: u64) -> Result<()>;

    async fn push_audio_frame(&self, frame: &OpusFrame) -> Result<()>;
}

/// Everything the worker owns while it runs
pub struct PipelineContext {
    pub camera: Arc<dyn FrameSource>,
    pub encoder: Box<dyn VideoEncoder>,
    pub audio: Option<Arc<dyn AudioSource>>,
    pub sink: Arc<dyn MediaSink>,
    pub events: Arc<EventBus>,
}

/// Counters reported when the worker exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub batches_encoded: u64,
    pub frames_sent: u64,
    pub push_failures: u64,
    pub audio_sent: u64,
}

/// Handle to a running pipeline worker
pub struct StreamPipeline {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<PipelineStats>>,
}

impl StreamPipeline {
    /// Start the worker. `shutdown` is the process-wide stop request, also
    /// observed each iteration.
    pub fn spawn(ctx: PipelineContext, shutdown: Arc<AtomicBool>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let runtime = Handle::current();

        let handle = tokio::task::spawn_blocking(move || {
            let mut worker = Worker::new(ctx, runtime);
            info!("Stream pipeline started");
            while flag.load(Ordering::Acquire) && !shutdown.load(Ordering::Acquire) {
                worker.step();
            }
            info!("Stream pipeline stopped: {:?}", worker.stats);
            worker.stats
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Clear the run flag and join the worker, waiting at most `timeout`
    pub async fn stop(&mut self, timeout: Duration) -> Result<PipelineStats> {
        self.running.store(false, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return Ok(PipelineStats::default());
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(AppError::RuntimeError(format!(
                "Pipeline worker failed: {}",
                e
            ))),
            Err(_) => Err(AppError::RuntimeError(format!(
                "Pipeline worker did not stop within {:?}",
                timeout
            ))),
        }
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

struct Worker {
    ctx: PipelineContext,
    runtime: Handle,
    /// Set by the first multi-unit batch; carries the pts base
    started_at: Option<Instant>,
    stats: PipelineStats,
    throttler: LogThrottler,
}

impl Worker {
    fn new(ctx: PipelineContext, runtime: Handle) -> Self {
        Self {
            ctx,
            runtime,
            started_at: None,
            stats: PipelineStats::default(),
            throttler: LogThrottler::with_secs(5),
        }
    }

    fn step(&mut self) {
        // No viewer: frames are dropped at the source, not queued
        if !self.ctx.sink.is_video_track_open() {
            std::thread::sleep(IDLE_SLEEP);
            return;
        }

        let frame = match self.ctx.camera.try_pop() {
            Ok(frame) => frame,
            Err(e) => {
                warn_throttled!(self.throttler, "camera_pop", "Camera pop failed: {}", e);
                None
            }
        };

        let batch = match self.ctx.encoder.try_pop() {
            Ok(batch) => batch,
            Err(e) => {
                warn_throttled!(self.throttler, "encoder_pop", "Encoder pop failed: {}", e);
                None
            }
        };

        let idle = frame.is_none() && batch.is_none();

        if let Some(batch) = batch {
            self.stats.batches_encoded += 1;
            self.forward(&batch);
            self.ctx.encoder.release(batch);
        }

        if let Some(frame) = frame {
            self.stats.frames_captured += 1;
            if let Err(e) = self.ctx.encoder.push(&frame) {
                warn_throttled!(self.throttler, "encoder_push", "Encoder push failed: {}", e);
            }
            self.ctx.camera.release(frame);
        }

        self.drain_audio();

        if idle {
            std::thread::sleep(STARVED_SLEEP);
        }
    }

    fn forward(&mut self, batch: &EncodedBatch) {
        if self.started_at.is_none() {
            if batch.len() <= 1 {
                return;
            }
            debug!(
                "First multi-unit batch ({} units, {} bytes), stream started",
                batch.len(),
                batch.total_size()
            );
            self.started_at = Some(Instant::now());
            self.ctx.events.publish(StreamEvent::KeyframeReady);
        }

        let Some(base) = self.started_at else {
            return;
        };
        let data = batch.concat();
        let pts = base.elapsed().as_millis() as u64 * TICKS_PER_MS;

        // Viewer may have left between the top-of-loop check and now
        if !self.ctx.sink.is_video_track_open() {
            return;
        }

        match self.runtime.block_on(self.ctx.sink.push_video_frame(data, pts)) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.throttler.clear("video_push");
            }
            Err(e) => {
                self.stats.push_failures += 1;
                error_throttled!(self.throttler, "video_push", "Video push failed: {}", e);
            }
        }
    }

    fn drain_audio(&mut self) {
        let Some(audio) = self.ctx.audio.clone() else {
            return;
        };

        loop {
            let frame = match audio.try_pop() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn_throttled!(self.throttler, "audio_pop", "Audio pop failed: {}", e);
                    break;
                }
            };

            if !self.ctx.sink.is_audio_track_open() {
                continue;
            }

            match self.runtime.block_on(self.ctx.sink.push_audio_frame(&frame)) {
                Ok(()) => self.stats.audio_sent += 1,
                Err(e) => {
                    warn_throttled!(self.throttler, "audio_push", "Audio push failed: {}", e)
                }
            }
        }
    }
}
