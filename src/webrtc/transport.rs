//! Media transport seam
//!
//! The peer session drives an opaque transport connection: it adds tracks,
//! exchanges descriptions and candidates, and reacts to [`TransportEvent`]s.
//! ICE, DTLS, SRTP and congestion control all live behind these traits.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::config::SessionConfig;
use crate::config::VideoCodec;
use crate::error::Result;

/// Transport-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Lifecycle notifications raised by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    /// Locally gathered candidate string
    CandidateGathered(String),
    DataChannelOpened(String),
    DataChannelMessage { label: String, len: usize },
    DataChannelClosed(String),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Outgoing RTP packets for one video track
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn write_rtp(&self, packet: &rtp::packet::Packet) -> Result<()>;
}

/// Outgoing timed samples for one audio track
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()>;
}

/// One live transport connection
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Attach a send-only video track offering `codec`
    async fn add_video_track(&self, codec: VideoCodec) -> Result<Arc<dyn RtpSink>>;

    /// Attach a send-only Opus track
    async fn add_audio_track(&self) -> Result<Arc<dyn SampleSink>>;

    /// Generate an offer and install it as the local description
    async fn create_offer(&self) -> Result<()>;

    /// Current local description including candidates gathered so far
    async fn local_description(&self) -> Option<String>;

    /// Apply the viewer's answer
    async fn set_remote_description(&self, sdp: &str) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &str, mid: Option<String>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Factory for transport connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection that reports its lifecycle through `events`
    async fn connect(
        &self,
        config: &SessionConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn TransportConnection>>;
}
