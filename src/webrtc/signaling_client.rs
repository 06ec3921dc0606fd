//! Rendezvous client role
//!
//! Used when the device joins a signaling endpoint on another host. The
//! device announces itself with a `request` under the `server` id, then
//! answers every `request` it receives with its offer.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::config::DescriptionRetry;
use super::session::PeerSession;
use super::signaling::{
    offer_message, request_message, wait_for_description, WireMessage, WireSender, SERVER_ID,
    TYPE_ANSWER, TYPE_BUSY, TYPE_CANDIDATE, TYPE_REQUEST,
};
use super::signaling_server::DisconnectCallback;
use crate::config::NegotiationConfig;
use crate::error::{AppError, Result};

struct ClientInner {
    session: Arc<PeerSession>,
    retry: DescriptionRetry,
    on_disconnect: DisconnectCallback,
}

impl ClientInner {
    async fn handle_text(&self, text: &str, tx: &WireSender) {
        let msg = match WireMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Discarding malformed signaling message: {}", e);
                return;
            }
        };

        match msg.kind() {
            TYPE_REQUEST => {
                let peer = msg.id().unwrap_or(SERVER_ID).to_string();
                info!("Remote {} requested the stream", peer);

                let session = self.session.clone();
                let retry = self.retry;
                let tx = tx.clone();
                tokio::spawn(async move {
                    match wait_for_description(&session, retry).await {
                        Some(sdp) => {
                            let _ = tx.send(offer_message(&peer, &sdp));
                        }
                        None => warn!(
                            "No local description after {:?}, dropping request from {}",
                            retry.budget(),
                            peer
                        ),
                    }
                });
            }
            TYPE_ANSWER => match msg.sdp() {
                Some(sdp) => self.session.set_remote_description(sdp).await,
                None => warn!("Answer carries no sdp"),
            },
            TYPE_CANDIDATE => {
                if let Some(candidate) = msg.candidate() {
                    self.session
                        .add_remote_candidate(candidate, msg.mid().map(str::to_string))
                        .await;
                }
            }
            TYPE_BUSY => warn!("Remote endpoint reports busy"),
            other => debug!("Ignoring {} message", other),
        }
    }
}

struct Connection {
    url: String,
    tx: WireSender,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Outbound WebSocket connection to a remote rendezvous endpoint
pub struct SignalingClient {
    inner: Arc<ClientInner>,
    connect_attempts: u32,
    connect_poll: Duration,
    connection: Mutex<Option<Connection>>,
}

impl SignalingClient {
    pub fn new(
        session: Arc<PeerSession>,
        negotiation: &NegotiationConfig,
        on_disconnect: DisconnectCallback,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                session,
                retry: DescriptionRetry::from_negotiation(negotiation),
                on_disconnect,
            }),
            connect_attempts: negotiation.connect_attempts.max(1),
            connect_poll: Duration::from_millis(negotiation.connect_poll_ms),
            connection: Mutex::new(None),
        }
    }

    /// Connect to `ws://<ip>:<port>/server` and announce the device
    ///
    /// Fails with `RuntimeError` when the socket does not open within the
    /// polling budget. No-op when already connected.
    pub async fn connect(&self, ip: &str, port: u16) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }

        let url = format!("ws://{}:{}/{}", ip, port, SERVER_ID);
        let ws = self.open_socket(&url).await?;
        info!("Connected to signaling endpoint {}", url);

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!("Signaling write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let _ = tx.send(request_message(SERVER_ID));

        let inner = self.inner.clone();
        let reader_tx = tx.clone();
        let reader_url = url.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => inner.handle_text(&text, &reader_tx).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling connection error: {}", e);
                        break;
                    }
                }
            }
            info!("Signaling endpoint {} closed the connection", reader_url);
            (inner.on_disconnect)(SERVER_ID.to_string());
        });

        *connection = Some(Connection {
            url,
            tx,
            reader,
            writer,
        });
        Ok(())
    }

    async fn open_socket(
        &self,
        url: &str,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    > {
        let mut last_error = String::from("timed out");
        for attempt in 1..=self.connect_attempts {
            let started = tokio::time::Instant::now();
            match tokio::time::timeout(self.connect_poll, tokio_tungstenite::connect_async(url))
                .await
            {
                Ok(Ok((ws, _))) => return Ok(ws),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = String::from("timed out"),
            }
            debug!(
                "Signaling connect attempt {}/{} failed: {}",
                attempt, self.connect_attempts, last_error
            );
            tokio::time::sleep_until(started + self.connect_poll).await;
        }

        Err(AppError::RuntimeError(format!(
            "Failed to connect to signaling endpoint {} after {:?}: {}",
            url,
            self.connect_poll * self.connect_attempts,
            last_error
        )))
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.reader.is_finished())
    }

    /// Close the connection without triggering the disconnect callback
    pub async fn disconnect(&self) {
        let Some(conn) = self.connection.lock().await.take() else {
            return;
        };
        conn.reader.abort();
        drop(conn.tx);
        if tokio::time::timeout(Duration::from_secs(1), conn.writer)
            .await
            .is_err()
        {
            debug!("Signaling writer did not finish in time");
        }
        info!("Disconnected from signaling endpoint {}", conn.url);
    }
}
