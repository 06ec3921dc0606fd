//! WebRTC streaming for a single viewer
//!
//! Architecture:
//! ```text
//! FrameSource ──> StreamPipeline ──> PeerSession ──> VideoTrack / AudioTrack
//!                                        │                   │ RTP
//!                                        │                   v
//!                                        │            Transport (webrtc-rs)
//!                                        │
//! Browser <── offer / answer / candidates ──> SignalingService (hosted)
//!                                        └──> SignalingClient  (remote rendezvous)
//! ```
//!
//! [`SessionManager`] ties the pieces together for one streaming run.

pub mod config;
pub mod h265_payloader;
pub mod manager;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod signaling_client;
pub mod signaling_server;
pub mod track;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DescriptionRetry, SessionConfig};
pub use manager::SessionManager;
pub use peer::{RtcConnection, RtcTransport};
pub use session::{PeerSession, SessionState};
pub use signaling::{SignalingEvent, WireMessage};
pub use signaling_client::SignalingClient;
pub use signaling_server::{DisconnectCallback, SignalingService};
pub use track::{AudioTrack, VideoTrack};
pub use transport::{
    ConnectionState, RtpSink, SampleSink, Transport, TransportConnection, TransportEvent,
};
