//! Peer session configuration

use std::time::Duration;

use crate::config::{NegotiationConfig, StreamerConfig, VideoCodec};
use crate::error::Result;

/// Payload type offered for the video codec
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;

/// Payload type offered for Opus
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;

/// Requested video SSRC; the transport may rewrite it per binding
pub const VIDEO_SSRC: u32 = 1;

/// RTP clock for video payloads
pub const VIDEO_CLOCK_RATE: u32 = 90000;

/// Largest RTP payload produced by the packetizers
pub const RTP_MTU: usize = 1200;

/// Receiver-side playout delay hint
pub const PLAYOUT_DELAY_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/playout-delay";

/// Media stream id shared by the video and audio tracks
pub const STREAM_ID: &str = "vision-stream";

/// Bounded wait for a non-empty local description
///
/// Description generation lags track setup while candidates are gathered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptionRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl DescriptionRetry {
    pub fn from_negotiation(cfg: &NegotiationConfig) -> Self {
        Self {
            attempts: cfg.description_attempts.max(1),
            delay: Duration::from_millis(cfg.description_delay_ms),
        }
    }

    /// Total time the retry loop may wait
    pub fn budget(&self) -> Duration {
        self.delay * self.attempts
    }
}

impl Default for DescriptionRetry {
    fn default() -> Self {
        Self::from_negotiation(&NegotiationConfig::default())
    }
}

/// Everything needed to (re)build a transport connection
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub codec: VideoCodec,
    /// ICE server URLs, e.g. `stun:stun.l.google.com:19302`
    pub ice_servers: Vec<String>,
    pub audio: bool,
    /// Pause after closing the old connection on reset
    pub reset_settle: Duration,
}

impl SessionConfig {
    pub fn from_streamer(
        stream: &StreamerConfig,
        negotiation: &NegotiationConfig,
        audio: bool,
    ) -> Result<Self> {
        let ice_servers = if stream.stun_server.trim().is_empty() {
            Vec::new()
        } else {
            vec![stream.stun_server.trim().to_string()]
        };

        Ok(Self {
            codec: stream.video_codec()?,
            ice_servers,
            audio,
            reset_settle: Duration::from_millis(negotiation.reset_settle_ms),
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            ice_servers: Vec::new(),
            audio: false,
            reset_settle: Duration::from_millis(100),
        }
    }
}
