//! In-memory transport used by the session, signaling and manager tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::config::SessionConfig;
use super::transport::{
    ConnectionState, RtpSink, SampleSink, Transport, TransportConnection, TransportEvent,
    TransportEventSender,
};
use crate::config::VideoCodec;
use crate::error::{AppError, Result};

#[derive(Default)]
pub struct RecordingRtpSink {
    packets: Mutex<Vec<rtp::packet::Packet>>,
}

impl RecordingRtpSink {
    pub fn packets(&self) -> Vec<rtp::packet::Packet> {
        self.packets.lock().clone()
    }
}

#[async_trait]
impl RtpSink for RecordingRtpSink {
    async fn write_rtp(&self, packet: &rtp::packet::Packet) -> Result<()> {
        self.packets.lock().push(packet.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSampleSink {
    samples: Mutex<Vec<(Bytes, Duration)>>,
}

impl RecordingSampleSink {
    pub fn samples(&self) -> Vec<(Bytes, Duration)> {
        self.samples.lock().clone()
    }
}

#[async_trait]
impl SampleSink for RecordingSampleSink {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        self.samples.lock().push((data, duration));
        Ok(())
    }
}

/// Local description produced by [`FakeConnection::create_offer`]
pub const FAKE_OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=candidate:1 1 udp 2130706431 192.168.1.10 50000 typ host\r\n\
a=candidate:2 1 udp 2130706431 fe80::1 50001 typ host\r\n\
a=mid:0\r\n";

pub struct FakeConnection {
    pub id: usize,
    events: TransportEventSender,
    local: Mutex<Option<String>>,
    remote: Mutex<Option<String>>,
    candidates: Mutex<Vec<String>>,
    closed: AtomicBool,
    /// When set, `create_offer` succeeds but no description appears
    withhold_offer: bool,
    video: Mutex<Option<(VideoCodec, Arc<RecordingRtpSink>)>>,
    audio: Mutex<Option<Arc<RecordingSampleSink>>>,
}

impl FakeConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<String> {
        self.remote.lock().clone()
    }

    pub fn remote_candidates(&self) -> Vec<String> {
        self.candidates.lock().clone()
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.video.lock().as_ref().map(|(codec, _)| *codec)
    }

    pub fn video_sink(&self) -> Option<Arc<RecordingRtpSink>> {
        self.video.lock().as_ref().map(|(_, sink)| sink.clone())
    }

    pub fn audio_sink(&self) -> Option<Arc<RecordingSampleSink>> {
        self.audio.lock().clone()
    }

    /// Inject a transport event as if the stack had raised it
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn add_video_track(&self, codec: VideoCodec) -> Result<Arc<dyn RtpSink>> {
        let sink = Arc::new(RecordingRtpSink::default());
        *self.video.lock() = Some((codec, sink.clone()));
        Ok(sink)
    }

    async fn add_audio_track(&self) -> Result<Arc<dyn SampleSink>> {
        let sink = Arc::new(RecordingSampleSink::default());
        *self.audio.lock() = Some(sink.clone());
        Ok(sink)
    }

    async fn create_offer(&self) -> Result<()> {
        if !self.withhold_offer {
            *self.local.lock() = Some(FAKE_OFFER.to_string());
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<()> {
        if !sdp.starts_with("v=0") {
            return Err(AppError::WebRtcError("malformed answer".to_string()));
        }
        *self.remote.lock() = Some(sdp.to_string());
        self.emit(TransportEvent::StateChanged(ConnectionState::Connected));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str, _mid: Option<String>) -> Result<()> {
        self.candidates.lock().push(candidate.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::StateChanged(ConnectionState::Closed));
        Ok(())
    }
}

/// Hands out [`FakeConnection`]s and remembers them in creation order
#[derive(Default)]
pub struct FakeTransport {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    counter: AtomicUsize,
    fail_connect: AtomicBool,
    withhold_offer: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_withhold_offer(&self, withhold: bool) {
        self.withhold_offer.store(withhold, Ordering::SeqCst);
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<FakeConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        _config: &SessionConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn TransportConnection>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AppError::WebRtcError("transport unavailable".to_string()));
        }
        let conn = Arc::new(FakeConnection {
            id: self.counter.fetch_add(1, Ordering::SeqCst),
            events,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            withhold_offer: self.withhold_offer.load(Ordering::SeqCst),
            video: Mutex::new(None),
            audio: Mutex::new(None),
        });
        self.connections.lock().push(conn.clone());
        Ok(conn)
    }
}
