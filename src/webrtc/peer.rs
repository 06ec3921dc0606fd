//! webrtc-rs backed transport
//!
//! Each connection registers exactly one video codec at payload type 96 and
//! Opus at 97, so the offer never advertises a format the encoder cannot
//! produce.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTCRtpHeaderExtensionCapability, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

use super::config::{
    SessionConfig, AUDIO_PAYLOAD_TYPE, PLAYOUT_DELAY_URI, STREAM_ID, VIDEO_CLOCK_RATE,
    VIDEO_PAYLOAD_TYPE,
};
use super::transport::{
    ConnectionState, RtpSink, SampleSink, Transport, TransportConnection, TransportEvent,
    TransportEventSender,
};
use crate::audio::{OPUS_CHANNELS, OPUS_SAMPLE_RATE};
use crate::config::VideoCodec;
use crate::error::{AppError, Result};

fn rtc_err(context: &str) -> impl Fn(webrtc::Error) -> AppError + '_ {
    move |e| AppError::WebRtcError(format!("{}: {}", context, e))
}

fn video_feedback() -> Vec<RTCPFeedback> {
    vec![
        RTCPFeedback {
            typ: "goog-remb".to_string(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "pli".to_string(),
        },
    ]
}

/// Capability offered for the video track
pub fn video_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: codec.sdp_fmtp().to_string(),
        rtcp_feedback: video_feedback(),
    }
}

/// Capability offered for the Opus track
pub fn audio_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: OPUS_SAMPLE_RATE,
        channels: OPUS_CHANNELS,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

fn build_api(codec: VideoCodec) -> Result<API> {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: video_capability(codec),
                payload_type: VIDEO_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(rtc_err("Failed to register video codec"))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: audio_capability(),
                payload_type: AUDIO_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(rtc_err("Failed to register audio codec"))?;

    media_engine
        .register_header_extension(
            RTCRtpHeaderExtensionCapability {
                uri: PLAYOUT_DELAY_URI.to_string(),
            },
            RTPCodecType::Video,
            None,
        )
        .map_err(rtc_err("Failed to register playout-delay extension"))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(rtc_err("Failed to register interceptors"))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Creates webrtc-rs peer connections
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcTransport;

impl RtcTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for RtcTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn TransportConnection>> {
        let conn = RtcConnection::new(config, events).await?;
        Ok(Arc::new(conn))
    }
}

/// One webrtc-rs peer connection
pub struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
}

impl RtcConnection {
    async fn new(config: &SessionConfig, events: TransportEventSender) -> Result<Self> {
        let api = build_api(config.codec)?;

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(rtc_err("Failed to create peer connection"))?;

        let conn = Self { pc: Arc::new(pc) };
        conn.setup_event_handlers(events);
        Ok(conn)
    }

    fn setup_event_handlers(&self, events: TransportEventSender) {
        let tx = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                if let Some(state) = map_state(s) {
                    let _ = tx.send(TransportEvent::StateChanged(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(c) = candidate {
                    if let Ok(init) = c.to_json() {
                        let _ = tx.send(TransportEvent::CandidateGathered(init.candidate));
                    }
                }
                Box::pin(async {})
            }));

        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let tx = events.clone();
                Box::pin(async move {
                    let label = dc.label().to_string();
                    let _ = tx.send(TransportEvent::DataChannelOpened(label.clone()));

                    let msg_tx = tx.clone();
                    let msg_label = label.clone();
                    dc.on_message(Box::new(move |msg: DataChannelMessage| {
                        let _ = msg_tx.send(TransportEvent::DataChannelMessage {
                            label: msg_label.clone(),
                            len: msg.data.len(),
                        });
                        Box::pin(async {})
                    }));

                    dc.on_close(Box::new(move || {
                        let _ = tx.send(TransportEvent::DataChannelClosed(label.clone()));
                        Box::pin(async {})
                    }));
                })
            }));
    }

    async fn attach(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()> {
        let sender = self
            .pc
            .add_track(track)
            .await
            .map_err(rtc_err("Failed to add track"))?;

        // RTCP has to be read for NACK and PLI interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
            debug!("RTCP reader finished");
        });
        Ok(())
    }
}

#[async_trait]
impl TransportConnection for RtcConnection {
    async fn add_video_track(&self, codec: VideoCodec) -> Result<Arc<dyn RtpSink>> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            video_capability(codec),
            "video".to_string(),
            STREAM_ID.to_string(),
        ));
        self.attach(track.clone()).await?;
        info!("{} video track added", codec);
        Ok(Arc::new(RtpTrackSink { track }))
    }

    async fn add_audio_track(&self) -> Result<Arc<dyn SampleSink>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            audio_capability(),
            "audio".to_string(),
            STREAM_ID.to_string(),
        ));
        self.attach(track.clone()).await?;
        info!("Opus audio track added");
        Ok(Arc::new(SampleTrackSink { track }))
    }

    async fn create_offer(&self) -> Result<()> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(rtc_err("Failed to create offer"))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(rtc_err("Failed to set local description"))
    }

    async fn local_description(&self) -> Option<String> {
        self.pc.local_description().await.map(|d| d.sdp)
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(rtc_err("Invalid answer"))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(rtc_err("Failed to set remote description"))
    }

    async fn add_ice_candidate(&self, candidate: &str, mid: Option<String>) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.to_string(),
                sdp_mid: mid,
                ..Default::default()
            })
            .await
            .map_err(rtc_err("Failed to add ICE candidate"))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(rtc_err("Failed to close peer connection"))
    }
}

struct RtpTrackSink {
    track: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl RtpSink for RtpTrackSink {
    async fn write_rtp(&self, packet: &rtp::packet::Packet) -> Result<()> {
        self.track
            .write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(rtc_err("RTP write failed"))
    }
}

struct SampleTrackSink {
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl SampleSink for SampleTrackSink {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(rtc_err("Sample write failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_capability_per_codec() {
        let h264 = video_capability(VideoCodec::H264);
        assert_eq!(h264.mime_type, "video/H264");
        assert!(h264.sdp_fmtp_line.contains("packetization-mode=1"));
        assert_eq!(h264.clock_rate, 90000);

        let h265 = video_capability(VideoCodec::H265);
        assert_eq!(h265.mime_type, "video/H265");
        assert!(h265
            .rtcp_feedback
            .iter()
            .any(|fb| fb.typ == "nack" && fb.parameter == "pli"));
    }

    #[tokio::test]
    async fn test_offer_advertises_single_video_codec() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let config = SessionConfig {
            codec: VideoCodec::H265,
            ..Default::default()
        };
        let conn = RtcTransport::new().connect(&config, tx).await.unwrap();
        conn.add_video_track(VideoCodec::H265).await.unwrap();
        conn.create_offer().await.unwrap();

        let sdp = conn.local_description().await.unwrap();
        assert!(sdp.contains("a=rtpmap:96 H265/90000"));
        assert!(!sdp.contains("H264"));
        conn.close().await.unwrap();
    }
}
