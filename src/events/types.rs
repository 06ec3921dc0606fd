//! Stream event types
//!
//! Events published by the streamer on its [`EventBus`](super::EventBus).

use serde::{Deserialize, Serialize};

/// Streamer lifecycle event
///
/// Serialized as a tagged record, e.g.
/// ```json
/// { "event": "viewer.connected", "data": { "client_id": "c1" } }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    /// Pipeline and signaling role are up
    #[serde(rename = "stream.started")]
    Started {
        /// "H.264" or "H.265"
        codec: String,
        /// "server" when hosting the rendezvous endpoint, "client" otherwise
        signaling_role: String,
    },

    /// Pipeline stopped and signaling torn down
    #[serde(rename = "stream.stopped")]
    Stopped,

    /// First parameter-set + keyframe batch reached the encoder output
    #[serde(rename = "stream.keyframe_ready")]
    KeyframeReady,

    /// A viewer registered with the signaling endpoint
    #[serde(rename = "viewer.connected")]
    ViewerConnected { client_id: String },

    /// A viewer's signaling connection closed
    #[serde(rename = "viewer.disconnected")]
    ViewerDisconnected { client_id: String },

    /// A second viewer was turned away while another owns the session
    #[serde(rename = "viewer.rejected")]
    ViewerRejected { client_id: String },

    /// Peer session rebuilt in place
    #[serde(rename = "session.reset")]
    SessionReset {
        /// Generation of the new session (starts at 1)
        generation: u64,
    },

    /// Transport connection state changed
    #[serde(rename = "session.state_changed")]
    SessionStateChanged { state: String },
}

impl StreamEvent {
    /// Event name as it appears in the serialized form
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "stream.started",
            Self::Stopped => "stream.stopped",
            Self::KeyframeReady => "stream.keyframe_ready",
            Self::ViewerConnected { .. } => "viewer.connected",
            Self::ViewerDisconnected { .. } => "viewer.disconnected",
            Self::ViewerRejected { .. } => "viewer.rejected",
            Self::SessionReset { .. } => "session.reset",
            Self::SessionStateChanged { .. } => "session.state_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_matches_serialized_tag() {
        let events = [
            StreamEvent::Started {
                codec: "H.264".to_string(),
                signaling_role: "server".to_string(),
            },
            StreamEvent::Stopped,
            StreamEvent::KeyframeReady,
            StreamEvent::ViewerConnected {
                client_id: "c1".to_string(),
            },
            StreamEvent::SessionReset { generation: 2 },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.event_name());
        }
    }
}
