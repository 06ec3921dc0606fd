//! Outgoing media tracks
//!
//! A track belongs to exactly one transport connection. Once the connection
//! is retired the track is closed and every later write reports `NotReady`;
//! the pipeline treats that as "no viewer" rather than as a failure.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use rtp::codecs::h264::H264Payloader;
use rtp::packetizer::Payloader;

use super::config::{RTP_MTU, VIDEO_PAYLOAD_TYPE, VIDEO_SSRC};
use super::h265_payloader::H265Payloader;
use super::transport::{RtpSink, SampleSink};
use crate::audio::OpusFrame;
use crate::config::VideoCodec;
use crate::error::{AppError, Result};

enum CodecPayloader {
    H264(H264Payloader),
    H265(H265Payloader),
}

impl CodecPayloader {
    fn new(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::H264 => CodecPayloader::H264(H264Payloader::default()),
            VideoCodec::H265 => CodecPayloader::H265(H265Payloader::new()),
        }
    }

    fn payload(&mut self, data: &Bytes) -> Result<Vec<Bytes>> {
        match self {
            CodecPayloader::H264(p) => p
                .payload(RTP_MTU, data)
                .map_err(|e| AppError::WebRtcError(format!("H264 packetization failed: {}", e))),
            CodecPayloader::H265(p) => Ok(p.payload(RTP_MTU, data)),
        }
    }
}

/// Sequence and timestamp state for one RTP stream
struct VideoPacketizer {
    payloader: CodecPayloader,
    sequence: u16,
}

impl VideoPacketizer {
    fn new(codec: VideoCodec) -> Self {
        Self {
            payloader: CodecPayloader::new(codec),
            sequence: rand::random::<u16>(),
        }
    }

    /// RTP packets for one access unit; the marker is set on the last one
    fn packetize(&mut self, data: &Bytes, timestamp: u32) -> Result<Vec<rtp::packet::Packet>> {
        let payloads = self.payloader.payload(data)?;
        let count = payloads.len();

        let packets = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let sequence_number = self.sequence;
                self.sequence = self.sequence.wrapping_add(1);
                rtp::packet::Packet {
                    header: rtp::header::Header {
                        version: 2,
                        marker: i + 1 == count,
                        payload_type: VIDEO_PAYLOAD_TYPE,
                        sequence_number,
                        timestamp,
                        ssrc: VIDEO_SSRC,
                        ..Default::default()
                    },
                    payload,
                }
            })
            .collect();
        Ok(packets)
    }
}

/// Send-only video track carrying H.264 or H.265 access units
pub struct VideoTrack {
    codec: VideoCodec,
    generation: u64,
    open: AtomicBool,
    closed: AtomicBool,
    sink: Arc<dyn RtpSink>,
    packetizer: Mutex<VideoPacketizer>,
    frames_sent: AtomicU64,
}

impl VideoTrack {
    pub fn new(codec: VideoCodec, generation: u64, sink: Arc<dyn RtpSink>) -> Self {
        Self {
            codec,
            generation,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sink,
            packetizer: Mutex::new(VideoPacketizer::new(codec)),
            frames_sent: AtomicU64::new(0),
        }
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Session generation this track was created for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    /// Mark the track as writable (transport connected) or not
    pub fn set_open(&self, open: bool) {
        if !self.closed.load(Ordering::Acquire) {
            self.open.store(open, Ordering::Release);
        }
    }

    /// Permanently close the track
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.open.store(false, Ordering::Release);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Packetize and send one Annex-B access unit stamped with `timestamp`
    /// (90 kHz ticks)
    pub async fn write_access_unit(&self, data: Bytes, timestamp: u64) -> Result<()> {
        if data.is_empty() {
            return Err(AppError::NotReady("empty access unit".to_string()));
        }
        if !self.is_open() {
            return Err(AppError::NotReady("video track is not open".to_string()));
        }

        let packets = self.packetizer.lock().packetize(&data, timestamp as u32)?;

        for packet in &packets {
            if self.closed.load(Ordering::Acquire) {
                return Err(AppError::NotReady("video track closed".to_string()));
            }
            self.sink.write_rtp(packet).await?;
        }

        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Sent {} byte access unit in {} packets (ts={})",
            data.len(),
            packets.len(),
            timestamp
        );
        Ok(())
    }
}

/// Send-only Opus track
pub struct AudioTrack {
    generation: u64,
    open: AtomicBool,
    closed: AtomicBool,
    sink: Arc<dyn SampleSink>,
}

impl AudioTrack {
    pub fn new(generation: u64, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            generation,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sink,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    pub fn set_open(&self, open: bool) {
        if !self.closed.load(Ordering::Acquire) {
            self.open.store(open, Ordering::Release);
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.open.store(false, Ordering::Release);
    }

    pub async fn write(&self, frame: &OpusFrame) -> Result<()> {
        if frame.is_empty() {
            return Err(AppError::NotReady("empty audio packet".to_string()));
        }
        if !self.is_open() {
            return Err(AppError::NotReady("audio track is not open".to_string()));
        }
        self.sink
            .write_sample(frame.data.clone(), frame.duration)
            .await
    }
}
