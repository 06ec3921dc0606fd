//! Streamer façade
//!
//! Owns the peer session, the pipeline worker, the signaling role and the
//! optional bootstrap page for one run, plus the overlay compositor which
//! outlives runs.

use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::config::{DescriptionRetry, SessionConfig};
use super::peer::RtcTransport;
use super::session::PeerSession;
use super::signaling_client::SignalingClient;
use super::signaling_server::{DisconnectCallback, SignalingService};
use super::transport::Transport;
use crate::audio::AudioSource;
use crate::config::{AppConfig, RateControl, VideoCodec};
use crate::error::{AppError, Result};
use crate::events::{EventBus, StreamEvent};
use crate::overlay::{
    Color, Orientation, OverlayBackend, RegionCompositor, RegionId, SoftwareOverlayBackend,
};
use crate::utils::server_urls;
use crate::video::{
    EncoderConfig, EncoderFactory, FrameSource, PipelineContext, PixelFormat, StreamPipeline,
    VideoFrame, VideoType,
};
use crate::web::{BootstrapPage, BootstrapServer};

/// Camera width must be a multiple of this for the encoder
const WIDTH_ALIGNMENT: u32 = 32;

/// Bounded wait for the pipeline worker on stop
const PIPELINE_STOP_TIMEOUT: Duration = Duration::from_secs(2);

enum SignalingRole {
    Server(SignalingService),
    Client(SignalingClient),
}

impl SignalingRole {
    fn name(&self) -> &'static str {
        match self {
            SignalingRole::Server(_) => "server",
            SignalingRole::Client(_) => "client",
        }
    }

    async fn stop(&self) {
        match self {
            SignalingRole::Server(service) => service.stop().await,
            SignalingRole::Client(client) => client.disconnect().await,
        }
    }
}

/// Everything that exists only while streaming
struct Running {
    session: Arc<PeerSession>,
    pipeline: StreamPipeline,
    shutdown: Arc<AtomicBool>,
    signaling: SignalingRole,
    bootstrap: Option<BootstrapServer>,
}

/// Public entry point: start/stop streaming, bind sources, draw overlays
pub struct SessionManager {
    config: AppConfig,
    video_type: VideoType,
    transport: Arc<dyn Transport>,
    encoders: Arc<dyn EncoderFactory>,
    events: Arc<EventBus>,
    camera: RwLock<Option<Arc<dyn FrameSource>>>,
    audio: RwLock<Option<Arc<dyn AudioSource>>>,
    compositor: Mutex<RegionCompositor>,
    /// Set while the built-in software backend is in use
    overlay: Option<SoftwareOverlayBackend>,
    running: tokio::sync::Mutex<Option<Running>>,
    /// Mirrors `running` for synchronous readers
    active_session: RwLock<Option<Arc<PeerSession>>>,
}

impl SessionManager {
    /// Validate the configuration and build a stopped manager on webrtc-rs
    pub fn new(config: AppConfig, encoders: Arc<dyn EncoderFactory>) -> Result<Self> {
        Self::with_transport(config, Arc::new(RtcTransport::new()), encoders)
    }

    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Result<Self> {
        let codec: VideoCodec = config.stream.video_codec()?;
        let rate_control: RateControl = config.stream.rate_control_mode()?;
        let video_type = VideoType::new(codec, rate_control);

        let overlay = SoftwareOverlayBackend::new();
        let compositor = RegionCompositor::new(
            Orientation::from_device(&config.device),
            Box::new(overlay.clone()),
        );

        info!("Streamer configured for {}", video_type);
        Ok(Self {
            config,
            video_type,
            transport,
            encoders,
            events: Arc::new(EventBus::new()),
            camera: RwLock::new(None),
            audio: RwLock::new(None),
            compositor: Mutex::new(compositor),
            overlay: Some(overlay),
            running: tokio::sync::Mutex::new(None),
            active_session: RwLock::new(None),
        })
    }

    /// Composite regions through `backend` instead of the in-memory software plane
    ///
    /// Regions added before the swap are dropped; the bound camera carries over.
    pub fn with_overlay_backend(mut self, backend: Box<dyn OverlayBackend>) -> Self {
        let mut compositor =
            RegionCompositor::new(Orientation::from_device(&self.config.device), backend);
        if let Some(camera) = self.compositor.get_mut().camera() {
            compositor.bind_camera(camera);
        }
        self.compositor = Mutex::new(compositor);
        self.overlay = None;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn video_type(&self) -> VideoType {
        self.video_type
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Bind the capture channel; it must deliver NV21 frames
    pub fn bind_camera(&self, camera: Arc<dyn FrameSource>) -> Result<()> {
        if camera.format() != PixelFormat::Nv21 {
            return Err(AppError::ArgsError(format!(
                "Camera must deliver {}, got {}",
                PixelFormat::Nv21,
                camera.format()
            )));
        }
        let resolution = camera.resolution();
        self.compositor.lock().bind_camera(resolution);
        *self.camera.write() = Some(camera);
        info!("Camera bound: {}", resolution);
        Ok(())
    }

    pub fn camera(&self) -> Option<Arc<dyn FrameSource>> {
        self.camera.read().clone()
    }

    /// Bind an Opus source; the next `start()` offers an audio track
    pub fn bind_audio_recorder(&self, recorder: Arc<dyn AudioSource>) {
        *self.audio.write() = Some(recorder);
        info!("Audio recorder bound");
    }

    /// Frames come from the bound camera only
    pub fn write(&self, _frame: &VideoFrame) -> Result<()> {
        Err(AppError::NotImplemented(
            "write: frames are taken from the bound camera".to_string(),
        ))
    }

    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AppError::Busy);
        }

        let camera = self
            .camera()
            .ok_or_else(|| AppError::NotReady("Bind a camera before starting".to_string()))?;
        let resolution = camera.resolution();
        if resolution.width % WIDTH_ALIGNMENT != 0 {
            return Err(AppError::ArgsError(format!(
                "Camera width {} must be a multiple of {}",
                resolution.width, WIDTH_ALIGNMENT
            )));
        }

        let stream = &self.config.stream;
        let encoder = self
            .encoders
            .create(&EncoderConfig {
                resolution,
                input_format: camera.format(),
                video_type: self.video_type,
                fps: camera.fps(),
                gop: stream.gop,
                bitrate: stream.bitrate,
            })
            .map_err(|e| AppError::RuntimeError(format!("Failed to create encoder: {}", e)))?;

        let audio = self.audio.read().clone();
        if let Some(audio) = &audio {
            audio.reset()?;
        }

        let session_config =
            SessionConfig::from_streamer(stream, &self.config.negotiation, audio.is_some())?;
        let session = Arc::new(PeerSession::new(
            session_config,
            self.transport.clone(),
            self.events.clone(),
        ));
        session.open().await?;

        let bootstrap = if stream.http_server {
            let page = BootstrapPage::new(stream.signaling_port, stream.stun_server.clone());
            match BootstrapServer::start(stream.bind_ip(), stream.port, page).await {
                Ok(server) => Some(server),
                Err(e) => {
                    session.close().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        let signaling = match self.start_signaling(&session).await {
            Ok(role) => role,
            Err(e) => {
                if let Some(server) = bootstrap {
                    server.stop().await;
                }
                session.close().await;
                return Err(e);
            }
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let pipeline = StreamPipeline::spawn(
            PipelineContext {
                camera,
                encoder,
                audio,
                sink: session.clone(),
                events: self.events.clone(),
            },
            shutdown.clone(),
        );

        self.events.publish(StreamEvent::Started {
            codec: self.video_type.codec().to_string(),
            signaling_role: signaling.name().to_string(),
        });
        info!(
            "Streaming started ({}, signaling {})",
            self.video_type,
            signaling.name()
        );

        *self.active_session.write() = Some(session.clone());
        *running = Some(Running {
            session,
            pipeline,
            shutdown,
            signaling,
            bootstrap,
        });
        Ok(())
    }

    async fn start_signaling(&self, session: &Arc<PeerSession>) -> Result<SignalingRole> {
        let stream = &self.config.stream;
        let on_disconnect = reset_on_disconnect(session);

        if stream.hosts_signaling() {
            let service = SignalingService::new(
                session.clone(),
                DescriptionRetry::from_negotiation(&self.config.negotiation),
                self.events.clone(),
                on_disconnect,
            );
            service.start(stream.bind_ip(), stream.signaling_port).await?;
            Ok(SignalingRole::Server(service))
        } else {
            let client =
                SignalingClient::new(session.clone(), &self.config.negotiation, on_disconnect);
            client
                .connect(stream.signaling_ip.trim(), stream.signaling_port)
                .await?;
            Ok(SignalingRole::Client(client))
        }
    }

    /// Stop the pipeline, signaling and bootstrap page. No-op when stopped.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        *self.active_session.write() = None;

        running.shutdown.store(true, Ordering::Release);
        match running.pipeline.stop(PIPELINE_STOP_TIMEOUT).await {
            Ok(stats) => info!("Pipeline finished: {:?}", stats),
            Err(e) => warn!("Pipeline stop: {}", e),
        }

        running.signaling.stop().await;
        if let Some(server) = running.bootstrap.take() {
            server.stop().await;
        }
        running.session.close().await;

        self.events.publish(StreamEvent::Stopped);
        info!("Streaming stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active_session.read().is_some()
    }

    /// Session of the current run
    pub fn peer_session(&self) -> Option<Arc<PeerSession>> {
        self.active_session.read().clone()
    }

    /// Address the hosted signaling endpoint is bound to, when this run hosts one
    pub async fn signaling_addr(&self) -> Option<SocketAddr> {
        let running = self.running.lock().await;
        match &running.as_ref()?.signaling {
            SignalingRole::Server(service) => service.local_addr().await,
            SignalingRole::Client(_) => None,
        }
    }

    pub async fn http_addr(&self) -> Option<SocketAddr> {
        let running = self.running.lock().await;
        running.as_ref()?.bootstrap.as_ref().map(|b| b.local_addr())
    }

    pub fn get_url(&self) -> String {
        let stream = &self.config.stream;
        format!("http://{}:{}", stream.bind_ip(), stream.port)
    }

    /// One viewer URL per reachable interface
    pub fn get_urls(&self) -> Vec<String> {
        let stream = &self.config.stream;
        server_urls(stream.bind_ip(), stream.port)
    }

    pub fn add_region(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<RegionId> {
        self.compositor
            .lock()
            .add_region(x, y, width, height, format)
    }

    /// Run `draw` over the region's zeroed BGRA canvas
    pub fn with_canvas<R>(&self, id: RegionId, draw: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut compositor = self.compositor.lock();
        let canvas = compositor.get_canvas(id)?;
        Ok(draw(canvas))
    }

    pub fn update_region(&self, id: RegionId) -> Result<()> {
        self.compositor.lock().update_region(id)
    }

    pub fn del_region(&self, id: RegionId) -> Result<()> {
        self.compositor.lock().del_region(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_rect(
        &self,
        id: RegionId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        color: Color,
        thickness: i32,
    ) -> Result<()> {
        self.compositor
            .lock()
            .draw_rect(id, x, y, width, height, color, thickness)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_string(
        &self,
        id: RegionId,
        x: i32,
        y: i32,
        text: &str,
        color: Color,
        size: u32,
        thickness: i32,
    ) -> Result<()> {
        self.compositor
            .lock()
            .draw_string(id, x, y, text, color, size, thickness)
    }

    /// Overlay plane composited at camera resolution by the software backend
    ///
    /// `None` before a camera is bound or when an external backend is installed.
    pub fn overlay_frame(&self) -> Option<Vec<u8>> {
        let overlay = self.overlay.as_ref()?;
        let camera = self.compositor.lock().camera()?;
        Some(overlay.render(camera))
    }
}

/// Disconnect callback that rebuilds the session in the background
fn reset_on_disconnect(session: &Arc<PeerSession>) -> DisconnectCallback {
    let session = Arc::downgrade(session);
    Arc::new(move |client_id: String| {
        let Some(session) = session.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            info!("Viewer {} left, resetting peer session", client_id);
            if let Err(e) = session.reset().await {
                warn!("Peer session reset failed: {}", e);
            }
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{ReplayEncoder, Resolution, TestPatternCamera, VideoEncoder};
    use crate::webrtc::session::SessionState;
    use crate::webrtc::testing::{FakeTransport, FAKE_OFFER};
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::Message;

    struct StaticStreamFactory;

    impl EncoderFactory for StaticStreamFactory {
        fn create(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>> {
            let stream: &'static [u8] = match config.video_type.codec() {
                VideoCodec::H264 => &[
                    0, 0, 0, 1, 0x67, 0x4D, 0, 0, 0, 1, 0x68, 0xEE, 0, 0, 0, 1, 0x65, 0x88,
                    0, 0, 0, 1, 0x41, 0x9A,
                ],
                VideoCodec::H265 => &[
                    0, 0, 0, 1, 0x40, 0x01, 0, 0, 0, 1, 0x42, 0x01, 0, 0, 0, 1, 0x44, 0x01,
                    0, 0, 0, 1, 0x26, 0x01, 0xAF, 0, 0, 0, 1, 0x02, 0x01, 0xD0,
                ],
            };
            Ok(Box::new(ReplayEncoder::from_bytes(
                Bytes::from_static(stream),
                config.video_type.codec(),
            )?))
        }
    }

    struct Nv12Camera;

    impl FrameSource for Nv12Camera {
        fn resolution(&self) -> Resolution {
            Resolution::new(64, 32)
        }
        fn format(&self) -> PixelFormat {
            PixelFormat::Nv12
        }
        fn fps(&self) -> u32 {
            30
        }
        fn try_pop(&self) -> Result<Option<VideoFrame>> {
            Ok(None)
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.stream.ip = "127.0.0.1".to_string();
        config.stream.port = 0;
        config.stream.signaling_port = 0;
        config.stream.http_server = false;
        config.negotiation.description_delay_ms = 10;
        config.negotiation.reset_settle_ms = 1;
        config
    }

    fn test_manager(config: AppConfig) -> (SessionManager, Arc<FakeTransport>) {
        let transport = FakeTransport::new();
        let manager =
            SessionManager::with_transport(config, transport.clone(), Arc::new(StaticStreamFactory))
                .unwrap();
        (manager, transport)
    }

    fn camera(width: u32) -> Arc<dyn FrameSource> {
        Arc::new(TestPatternCamera::new(Resolution::new(width, 32), 100).unwrap())
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_rejects_unknown_codec_or_rate_control() {
        let mut config = test_config();
        config.stream.codec = "vp9".to_string();
        assert!(matches!(
            SessionManager::with_transport(
                config,
                FakeTransport::new(),
                Arc::new(StaticStreamFactory)
            ),
            Err(AppError::ArgsError(_))
        ));

        let mut config = test_config();
        config.stream.rate_control = "crf".to_string();
        assert!(matches!(
            SessionManager::with_transport(
                config,
                FakeTransport::new(),
                Arc::new(StaticStreamFactory)
            ),
            Err(AppError::ArgsError(_))
        ));
    }

    #[tokio::test]
    async fn test_start_requirements() {
        let (manager, transport) = test_manager(test_config());
        assert!(manager.start().await.unwrap_err().is_not_ready());

        assert!(matches!(
            manager.bind_camera(Arc::new(Nv12Camera)),
            Err(AppError::ArgsError(_))
        ));
        assert!(manager.camera().is_none());

        manager.bind_camera(camera(48)).unwrap();
        assert!(matches!(
            manager.start().await,
            Err(AppError::ArgsError(_))
        ));
        assert!(transport.connections().is_empty());
        assert!(!manager.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_codec_rate_control_pairs_start() {
        for codec in ["h264", "h265"] {
            for rc in ["cbr", "vbr"] {
                let mut config = test_config();
                config.stream.codec = codec.to_string();
                config.stream.rate_control = rc.to_string();
                let (manager, _) = test_manager(config);
                manager.bind_camera(camera(64)).unwrap();

                manager.start().await.unwrap();
                assert!(manager.is_running());
                assert!(matches!(manager.start().await, Err(AppError::Busy)));

                manager.stop().await.unwrap();
                manager.stop().await.unwrap();
                assert!(!manager.is_running());
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_viewer_scenario() {
        let mut config = test_config();
        config.stream.http_server = true;
        let (manager, transport) = test_manager(config);
        manager.bind_camera(camera(64)).unwrap();
        let mut events = manager.events().subscribe();

        manager.start().await.unwrap();
        assert!(!manager.get_urls().is_empty());
        assert!(manager.get_urls().iter().all(|url| !url.is_empty()));
        assert!(manager.http_addr().await.is_some());

        let addr = manager.signaling_addr().await.unwrap();
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/c1", addr))
            .await
            .unwrap();
        ws.send(Message::Text(json!({"type": "request", "id": "c1"}).to_string()))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let offer: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["id"], "c1");
        assert!(!offer["sdp"].as_str().unwrap().is_empty());

        ws.send(Message::Text(
            json!({"type": "answer", "id": "c1", "sdp": FAKE_OFFER}).to_string(),
        ))
        .await
        .unwrap();

        let session = manager.peer_session().unwrap();
        wait_until(|| session.is_video_track_open()).await;
        assert_eq!(session.state(), SessionState::Connected);

        // Pipeline feeds the connected track
        let first_conn = transport.last().unwrap();
        wait_until(|| {
            first_conn
                .video_sink()
                .is_some_and(|sink| !sink.packets().is_empty())
        })
        .await;

        // Viewer leaves: the session is rebuilt in place
        let old_track = session.video_track().unwrap();
        ws.close(None).await.unwrap();
        wait_until(|| session.generation() == 2 && session.video_track().is_some()).await;
        assert!(!old_track.is_open());
        assert!(first_conn.is_closed());
        assert!(!session.local_description().await.is_empty());

        manager.stop().await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.event_name());
        }
        for expected in [
            "stream.started",
            "viewer.connected",
            "stream.keyframe_ready",
            "viewer.disconnected",
            "session.reset",
            "stream.stopped",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_signaling_bind_failure_cleans_up() {
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config();
        config.stream.signaling_port = blocker.local_addr().unwrap().port();
        let (manager, transport) = test_manager(config);
        manager.bind_camera(camera(64)).unwrap();

        assert!(matches!(
            manager.start().await,
            Err(AppError::RuntimeError(_))
        ));
        assert!(!manager.is_running());
        assert!(transport.last().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_region_operations() {
        let (manager, _) = test_manager(test_config());
        assert!(manager
            .draw_rect(0, 0, 0, 10, 10, Color::RED, 2)
            .unwrap_err()
            .is_not_ready());
        assert!(manager.overlay_frame().is_none());

        manager.bind_camera(camera(64)).unwrap();
        let id = manager.add_region(0, 0, 8, 8, PixelFormat::Bgra8888).unwrap();
        manager
            .with_canvas(id, |canvas| {
                assert!(canvas.iter().all(|b| *b == 0));
                canvas.fill(0xFF);
            })
            .unwrap();
        manager.update_region(id).unwrap();
        manager.del_region(id).unwrap();
        manager.del_region(id).unwrap();

        manager.draw_rect(4, 2, 2, 20, 20, Color::GREEN, 3).unwrap();
        assert_eq!(manager.overlay_frame().unwrap().len(), 64 * 32 * 4);

        assert!(matches!(
            manager.draw_string(0, 0, 0, "hi", Color::WHITE, 12, 1),
            Err(AppError::NotImplemented(_))
        ));
        let frame = VideoFrame::new(Bytes::new(), Resolution::new(64, 32), PixelFormat::Nv21, 0);
        assert!(matches!(
            manager.write(&frame),
            Err(AppError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_injected_overlay_backend_receives_regions() {
        let hardware = SoftwareOverlayBackend::new();
        let (manager, _) = test_manager(test_config());
        let manager = manager.with_overlay_backend(Box::new(hardware.clone()));

        manager.bind_camera(camera(64)).unwrap();
        let id = manager.add_region(4, 4, 8, 8, PixelFormat::Bgra8888).unwrap();
        manager
            .with_canvas(id, |canvas| canvas.fill(0x7F))
            .unwrap();
        manager.update_region(id).unwrap();

        let attached = hardware.attached(id).unwrap();
        assert!(attached.pixels.iter().all(|b| *b == 0x7F));
        manager.draw_rect(4, 0, 0, 64, 32, Color::BLUE, 2).unwrap();
        assert_eq!(hardware.attached_count(), 5);
        assert!(manager.overlay_frame().is_none());
    }

    #[test]
    fn test_url_formatting() {
        let mut config = test_config();
        config.stream.port = 8080;
        let (manager, _) = test_manager(config);
        assert_eq!(manager.get_url(), "http://127.0.0.1:8080");
        assert_eq!(manager.get_urls(), vec!["http://127.0.0.1:8080".to_string()]);

        let mut config = test_config();
        config.stream.ip = String::new();
        let (manager, _) = test_manager(config);
        assert!(manager.get_url().starts_with("http://0.0.0.0:"));
        assert!(!manager.get_urls().is_empty());
    }
}
