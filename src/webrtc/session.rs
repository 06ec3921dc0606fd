//! Peer session: one transport connection plus its tracks
//!
//! ```text
//!   Idle ──open──> Negotiating ──answer + transport up──> Connected
//!                      ^                                     │
//!                      └──────────── reset ──────────────────┘
//! ```
//!
//! The live connection sits behind an `ArcSwapOption` so the media path can
//! grab it without locking. Control operations (open, reset, close) are
//! serialized by an async mutex. Each connection gets its own event task
//! which is aborted when the connection is retired; events from an older
//! generation are ignored.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::sdp::{filter_ipv6_candidates, is_ipv6_candidate};
use super::track::{AudioTrack, VideoTrack};
use super::transport::{ConnectionState, Transport, TransportConnection, TransportEvent};
use crate::audio::OpusFrame;
use crate::error::{AppError, Result};
use crate::events::{EventBus, StreamEvent};
use crate::video::MediaSink;

/// Peer session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

struct ActiveConnection {
    generation: u64,
    conn: Arc<dyn TransportConnection>,
    video: Arc<VideoTrack>,
    audio: Option<Arc<AudioTrack>>,
    events_task: JoinHandle<()>,
}

impl ActiveConnection {
    /// Close tracks first so in-flight pushes fail fast, then the transport
    async fn retire(&self) {
        self.video.close();
        if let Some(audio) = &self.audio {
            audio.close();
        }
        self.events_task.abort();
        if let Err(e) = self.conn.close().await {
            debug!("Closing connection (generation {}) failed: {}", self.generation, e);
        }
    }
}

/// State shared with the per-connection event tasks
struct Shared {
    state: watch::Sender<SessionState>,
    /// Generation of the installed connection, 0 when none
    live_generation: AtomicU64,
    events: Arc<EventBus>,
}

impl Shared {
    fn set_state(&self, new: SessionState) {
        let changed = self.state.send_if_modified(|s| {
            if *s == new {
                false
            } else {
                *s = new;
                true
            }
        });
        if changed {
            debug!("Peer session state: {}", new);
            self.events.publish(StreamEvent::SessionStateChanged {
                state: new.to_string(),
            });
        }
    }
}

/// One negotiable peer connection that can be rebuilt in place
pub struct PeerSession {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    current: ArcSwapOption<ActiveConnection>,
    control: Mutex<()>,
    shared: Arc<Shared>,
    generation: AtomicU64,
    shutdown: AtomicBool,
}

impl PeerSession {
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>, events: Arc<EventBus>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            transport,
            current: ArcSwapOption::empty(),
            control: Mutex::new(()),
            shared: Arc::new(Shared {
                state,
                live_generation: AtomicU64::new(0),
                events,
            }),
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create the first connection and its offer. No-op when already open.
    pub async fn open(&self) -> Result<()> {
        let _guard = self.control.lock().await;
        self.shutdown.store(false, Ordering::Release);
        if self.current.load().is_some() {
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let active = self.build(generation).await?;
        self.install(active);
        info!(
            "Peer session opened ({}, audio: {})",
            self.config.codec, self.config.audio
        );
        Ok(())
    }

    /// Tear down the current connection and rebuild it with fresh tracks
    ///
    /// Track handles taken before the reset reject every later write.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.control.lock().await;
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AppError::NotReady("peer session is closed".to_string()));
        }

        if let Some(old) = self.current.swap(None) {
            self.shared.live_generation.store(0, Ordering::Release);
            old.retire().await;
            // No connection until the rebuild succeeds
            self.shared.set_state(SessionState::Closed);
            tokio::time::sleep(self.config.reset_settle).await;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let active = self.build(generation).await?;
        self.install(active);

        info!("Peer session reset (generation {})", generation);
        self.shared
            .events
            .publish(StreamEvent::SessionReset { generation });
        Ok(())
    }

    /// Retire the connection for good
    pub async fn close(&self) {
        let _guard = self.control.lock().await;
        self.shutdown.store(true, Ordering::Release);
        if let Some(old) = self.current.swap(None) {
            self.shared.live_generation.store(0, Ordering::Release);
            old.retire().await;
            info!("Peer session closed (generation {})", old.generation);
        }
        self.shared.set_state(SessionState::Closed);
    }

    async fn build(&self, generation: u64) -> Result<ActiveConnection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = self
            .transport
            .connect(&self.config, tx)
            .await
            .map_err(|e| AppError::RuntimeError(format!("Failed to create connection: {}", e)))?;

        match self.add_tracks(&conn, generation).await {
            Ok((video, audio)) => {
                self.shared
                    .live_generation
                    .store(generation, Ordering::Release);
                let events_task = tokio::spawn(run_events(
                    rx,
                    generation,
                    video.clone(),
                    audio.clone(),
                    self.shared.clone(),
                ));
                Ok(ActiveConnection {
                    generation,
                    conn,
                    video,
                    audio,
                    events_task,
                })
            }
            Err(e) => {
                let _ = conn.close().await;
                Err(AppError::RuntimeError(format!(
                    "Failed to set up peer connection: {}",
                    e
                )))
            }
        }
    }

    async fn add_tracks(
        &self,
        conn: &Arc<dyn TransportConnection>,
        generation: u64,
    ) -> Result<(Arc<VideoTrack>, Option<Arc<AudioTrack>>)> {
        let video = self.add_video_track(conn, generation).await?;
        let audio = if self.config.audio {
            Some(self.add_audio_track(conn, generation).await?)
        } else {
            None
        };
        conn.create_offer().await?;
        Ok((video, audio))
    }

    async fn add_video_track(
        &self,
        conn: &Arc<dyn TransportConnection>,
        generation: u64,
    ) -> Result<Arc<VideoTrack>> {
        let sink = conn.add_video_track(self.config.codec).await?;
        Ok(Arc::new(VideoTrack::new(self.config.codec, generation, sink)))
    }

    async fn add_audio_track(
        &self,
        conn: &Arc<dyn TransportConnection>,
        generation: u64,
    ) -> Result<Arc<AudioTrack>> {
        let sink = conn.add_audio_track().await?;
        Ok(Arc::new(AudioTrack::new(generation, sink)))
    }

    fn install(&self, active: ActiveConnection) {
        self.current.store(Some(Arc::new(active)));
        self.shared.set_state(SessionState::Negotiating);
    }

    /// Local description with IPv6 candidates removed; empty while none exists
    pub async fn local_description(&self) -> String {
        let Some(active) = self.current.load_full() else {
            return String::new();
        };
        match active.conn.local_description().await {
            Some(sdp) if !sdp.is_empty() => filter_ipv6_candidates(&sdp),
            _ => String::new(),
        }
    }

    /// Apply the viewer's answer. Bad input is logged, never raised.
    pub async fn set_remote_description(&self, sdp: &str) {
        let Some(active) = self.current.load_full() else {
            warn!("Remote description received without an open session");
            return;
        };
        if sdp.trim().is_empty() {
            warn!("Ignoring empty remote description");
            return;
        }
        match active.conn.set_remote_description(sdp).await {
            Ok(()) => info!(
                "Remote description applied (generation {})",
                active.generation
            ),
            Err(e) => warn!("Rejected remote description: {}", e),
        }
    }

    /// Best-effort trickle candidate from the viewer
    pub async fn add_remote_candidate(&self, candidate: &str, mid: Option<String>) {
        let Some(active) = self.current.load_full() else {
            return;
        };
        if let Err(e) = active.conn.add_ice_candidate(candidate, mid).await {
            debug!("Ignoring remote candidate: {}", e);
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Generation of the current connection (1 after the first open)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Handle to the current video track, if a connection exists
    pub fn video_track(&self) -> Option<Arc<VideoTrack>> {
        self.current.load_full().map(|a| a.video.clone())
    }

    pub fn audio_track(&self) -> Option<Arc<AudioTrack>> {
        self.current.load_full().and_then(|a| a.audio.clone())
    }

    pub fn is_video_track_open(&self) -> bool {
        self.current
            .load_full()
            .is_some_and(|a| a.video.is_open())
    }

    pub fn is_audio_track_open(&self) -> bool {
        self.audio_track().is_some_and(|a| a.is_open())
    }

    /// Send one access unit; `NotReady` while no viewer is connected
    pub async fn push_video_frame(&self, data: Bytes, timestamp: u64) -> Result<()> {
        let Some(active) = self.current.load_full() else {
            return Err(AppError::NotReady("no video track".to_string()));
        };
        active.video.write_access_unit(data, timestamp).await
    }

    pub async fn push_audio_frame(&self, frame: &OpusFrame) -> Result<()> {
        let Some(audio) = self.audio_track() else {
            return Err(AppError::NotReady("audio is not enabled".to_string()));
        };
        audio.write(frame).await
    }
}

#[async_trait]
impl MediaSink for PeerSession {
    fn is_video_track_open(&self) -> bool {
        PeerSession::is_video_track_open(self)
    }

    fn is_audio_track_open(&self) -> bool {
        PeerSession::is_audio_track_open(self)
    }

    async fn push_video_frame(&self, data: Bytes, timestamp: u64) -> Result<()> {
        PeerSession::push_video_frame(self, data, timestamp).await
    }

    async fn push_audio_frame(&self, frame: &OpusFrame) -> Result<()> {
        PeerSession::push_audio_frame(self, frame).await
    }
}

async fn run_events(
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    generation: u64,
    video: Arc<VideoTrack>,
    audio: Option<Arc<AudioTrack>>,
    shared: Arc<Shared>,
) {
    let set_tracks_open = |open: bool| {
        video.set_open(open);
        if let Some(audio) = &audio {
            audio.set_open(open);
        }
    };

    while let Some(event) = rx.recv().await {
        if shared.live_generation.load(Ordering::Acquire) != generation {
            debug!("Dropping event from stale generation {}: {:?}", generation, event);
            break;
        }

        match event {
            TransportEvent::StateChanged(state) => {
                info!("Transport state (generation {}): {}", generation, state);
                match state {
                    ConnectionState::Connected => {
                        set_tracks_open(true);
                        shared.set_state(SessionState::Connected);
                    }
                    ConnectionState::Disconnected => {
                        set_tracks_open(false);
                        shared.set_state(SessionState::Negotiating);
                    }
                    ConnectionState::Failed | ConnectionState::Closed => {
                        set_tracks_open(false);
                        shared.set_state(SessionState::Closed);
                    }
                    ConnectionState::New | ConnectionState::Connecting => {}
                }
            }
            TransportEvent::CandidateGathered(candidate) => {
                if is_ipv6_candidate(&candidate) {
                    debug!("Filtered IPv6 candidate: {}", candidate);
                } else {
                    debug!("Local candidate: {}", candidate);
                }
            }
            TransportEvent::DataChannelOpened(label) => {
                info!("Data channel opened: {}", label);
            }
            TransportEvent::DataChannelMessage { label, len } => {
                debug!("Data channel {} message: {} bytes", label, len);
            }
            TransportEvent::DataChannelClosed(label) => {
                info!("Data channel closed: {}", label);
            }
        }
    }
}
