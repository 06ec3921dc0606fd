use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Streamer construction parameters
    pub stream: StreamerConfig,
    /// Device orientation settings
    pub device: DeviceConfig,
    /// Negotiation timing
    pub negotiation: NegotiationConfig,
}

/// Streamer construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Bind address for the bootstrap HTTP server ("" means all interfaces)
    pub ip: String,
    /// Bootstrap HTTP port
    pub port: u16,
    /// Video codec ("h264" or "h265")
    pub codec: String,
    /// Rate control mode ("cbr" or "vbr")
    pub rate_control: String,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// GOP length in frames
    pub gop: u32,
    /// Remote signaling address; empty hosts the rendezvous endpoint locally
    pub signaling_ip: String,
    /// Signaling port (listen port in server role, remote port in client role)
    pub signaling_port: u16,
    /// ICE server URL handed to the transport and the viewer script
    pub stun_server: String,
    /// Run the bootstrap HTTP responder
    pub http_server: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: 8000,
            codec: "h264".to_string(),
            rate_control: "cbr".to_string(),
            bitrate: 3_000_000,
            gop: 60,
            signaling_ip: String::new(),
            signaling_port: 8001,
            stun_server: "stun:stun.l.google.com:19302".to_string(),
            http_server: true,
        }
    }
}

impl StreamerConfig {
    /// Bind address with the empty-string default resolved
    pub fn bind_ip(&self) -> &str {
        if self.ip.trim().is_empty() {
            "0.0.0.0"
        } else {
            self.ip.trim()
        }
    }

    /// Whether this device hosts its own rendezvous endpoint
    pub fn hosts_signaling(&self) -> bool {
        self.signaling_ip.trim().is_empty()
    }

    pub fn video_codec(&self) -> Result<VideoCodec> {
        self.codec.parse()
    }

    pub fn rate_control_mode(&self) -> Result<RateControl> {
        self.rate_control.parse()
    }
}

/// Device-level settings shared with other subsystems
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Sensor image is flipped upside down
    pub cam_flip: bool,
    /// Sensor image is mirrored left to right
    pub cam_mirror: bool,
}

/// Timing used while waiting on negotiation state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Attempts to read a non-empty local description before dropping a request
    pub description_attempts: u32,
    /// Delay between description attempts (ms)
    pub description_delay_ms: u64,
    /// Polls while waiting for the remote signaling connection to open
    pub connect_attempts: u32,
    /// Interval between connection polls (ms)
    pub connect_poll_ms: u64,
    /// Pause after closing the old transport during a reset (ms)
    pub reset_settle_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            description_attempts: 10,
            description_delay_ms: 200,
            connect_attempts: 50,
            connect_poll_ms: 100,
            reset_settle_ms: 100,
        }
    }
}

/// Video codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::H265 => "video/H265",
        }
    }

    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=4D0034"
            }
            VideoCodec::H265 => "profile-id=1;level-id=153",
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "h.264" | "avc" => Ok(VideoCodec::H264),
            "h265" | "h.265" | "hevc" => Ok(VideoCodec::H265),
            other => Err(AppError::ArgsError(format!("Unsupported video codec: {}", other))),
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::H265 => write!(f, "H.265"),
        }
    }
}

/// Encoder rate-control mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateControl {
    #[default]
    Cbr,
    Vbr,
}

impl std::str::FromStr for RateControl {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cbr" => Ok(RateControl::Cbr),
            "vbr" => Ok(RateControl::Vbr),
            other => Err(AppError::ArgsError(format!(
                "Unsupported rate control mode: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RateControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateControl::Cbr => write!(f, "CBR"),
            RateControl::Vbr => write!(f, "VBR"),
        }
    }
}
