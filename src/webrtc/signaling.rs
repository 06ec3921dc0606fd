//! Signaling wire format
//!
//! One JSON object per WebSocket text frame. Every message is a flat
//! record with a `type` and usually an `id`:
//!
//! ```json
//! {"id": "c1", "type": "request"}
//! {"id": "c1", "type": "offer", "sdp": "v=0..."}
//! {"id": "server", "type": "answer", "sdp": "v=0..."}
//! ```
//!
//! Types other than the ones the device understands are relayed between
//! viewers with `id` rewritten to the sender.

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::config::DescriptionRetry;
use super::session::PeerSession;
use crate::error::{AppError, Result};

/// Id the device answers to on the wire
pub const SERVER_ID: &str = "server";

pub const TYPE_REQUEST: &str = "request";
pub const TYPE_OFFER: &str = "offer";
pub const TYPE_ANSWER: &str = "answer";
pub const TYPE_CANDIDATE: &str = "candidate";
pub const TYPE_BUSY: &str = "busy";

/// Identity of one wire connection inside the service
pub type ConnId = u64;

/// Outgoing text frames for one connection
pub type WireSender = mpsc::UnboundedSender<String>;

/// Connection lifecycle as seen by the dispatcher
#[derive(Debug)]
pub enum SignalingEvent {
    Connected {
        conn: ConnId,
        tx: WireSender,
        /// Id taken from the upgrade path (`/<client_id>`), used when messages carry none
        path_id: Option<String>,
    },
    Message { conn: ConnId, text: String },
    Disconnected { conn: ConnId },
}

/// A parsed signaling message
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    fields: Map<String, Value>,
}

impl WireMessage {
    /// Parse one text frame; it must be a JSON object with a string `type`
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = value else {
            return Err(AppError::ArgsError(
                "signaling message is not an object".to_string(),
            ));
        };
        if !fields.get("type").is_some_and(Value::is_string) {
            return Err(AppError::ArgsError(
                "signaling message has no type".to_string(),
            ));
        }
        Ok(Self { fields })
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn kind(&self) -> &str {
        self.str_field("type").unwrap_or_default()
    }

    /// `id` field, ignoring empty strings
    pub fn id(&self) -> Option<&str> {
        self.str_field("id").filter(|id| !id.is_empty())
    }

    pub fn sdp(&self) -> Option<&str> {
        self.str_field("sdp")
    }

    pub fn candidate(&self) -> Option<&str> {
        self.str_field("candidate")
    }

    pub fn mid(&self) -> Option<&str> {
        self.str_field("mid").or_else(|| self.str_field("sdpMid"))
    }

    /// The same message with `id` replaced by `sender`
    pub fn relayed_from(&self, sender: &str) -> String {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(sender.to_string()));
        Value::Object(fields).to_string()
    }
}

pub fn request_message(id: &str) -> String {
    json!({ "id": id, "type": TYPE_REQUEST }).to_string()
}

pub fn offer_message(id: &str, sdp: &str) -> String {
    json!({ "id": id, "type": TYPE_OFFER, "sdp": sdp }).to_string()
}

pub fn answer_message(id: &str, sdp: &str) -> String {
    json!({ "id": id, "type": TYPE_ANSWER, "sdp": sdp }).to_string()
}

pub fn busy_message(id: &str) -> String {
    json!({ "id": id, "type": TYPE_BUSY }).to_string()
}

/// Poll the session for a non-empty local description
///
/// Returns `None` when the retry budget runs out.
pub async fn wait_for_description(session: &PeerSession, retry: DescriptionRetry) -> Option<String> {
    for attempt in 1..=retry.attempts {
        let sdp = session.local_description().await;
        if !sdp.is_empty() {
            return Some(sdp);
        }
        debug!(
            "Local description not ready (attempt {}/{})",
            attempt, retry.attempts
        );
        if attempt < retry.attempts {
            tokio::time::sleep(retry.delay).await;
        }
    }
    None
}
