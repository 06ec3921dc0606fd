//! Rendezvous endpoint hosted on the device
//!
//! Viewers connect over WebSocket, register under the `id` of their first
//! message and then request the stream. All connection bookkeeping lives in
//! one registration table guarded by a mutex; socket tasks only turn frames
//! into [`SignalingEvent`]s and hand them to [`SignalingService::dispatch`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::config::DescriptionRetry;
use super::session::PeerSession;
use super::signaling::{
    busy_message, offer_message, wait_for_description, ConnId, SignalingEvent, WireMessage,
    WireSender, SERVER_ID, TYPE_ANSWER, TYPE_CANDIDATE, TYPE_REQUEST,
};
use crate::error::{AppError, Result};
use crate::events::{EventBus, StreamEvent};

/// Bounded wait for the listener task on stop
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Invoked with the client id whenever a viewer that owns the session leaves
pub type DisconnectCallback = Arc<dyn Fn(String) + Send + Sync>;

struct Registration {
    tx: WireSender,
    client_id: Option<String>,
    path_id: Option<String>,
}

#[derive(Default)]
struct RegistrationTable {
    connections: HashMap<ConnId, Registration>,
    clients: HashMap<String, ConnId>,
    /// Viewer currently owning the peer session
    active_client: Option<String>,
}

impl RegistrationTable {
    fn sender(&self, conn: ConnId) -> Option<WireSender> {
        self.connections.get(&conn).map(|r| r.tx.clone())
    }

    fn client_sender(&self, client_id: &str) -> Option<WireSender> {
        self.clients
            .get(client_id)
            .and_then(|conn| self.sender(*conn))
    }
}

/// Outcome of registering the sender of a message
enum Registered {
    Client(String),
    /// Id already held by another live connection
    Duplicate(String),
    /// Connection vanished before its first message was handled
    Gone,
}

struct ServiceInner {
    session: Arc<PeerSession>,
    retry: DescriptionRetry,
    events: Arc<EventBus>,
    on_disconnect: DisconnectCallback,
    table: parking_lot::Mutex<RegistrationTable>,
    next_conn: AtomicU64,
}

impl ServiceInner {
    async fn dispatch(self: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected { conn, tx, path_id } => {
                debug!("Signaling connection {} opened", conn);
                self.table.lock().connections.insert(
                    conn,
                    Registration {
                        tx,
                        client_id: None,
                        path_id: path_id.filter(|id| !id.is_empty()),
                    },
                );
            }
            SignalingEvent::Message { conn, text } => self.on_message(conn, &text).await,
            SignalingEvent::Disconnected { conn } => self.handle_disconnect(conn),
        }
    }

    fn register(&self, conn: ConnId, msg: &WireMessage) -> Registered {
        let mut table = self.table.lock();

        let client_id = match table.connections.get(&conn) {
            None => return Registered::Gone,
            Some(reg) => match &reg.client_id {
                Some(id) => return Registered::Client(id.clone()),
                None => msg
                    .id()
                    .map(str::to_string)
                    .or_else(|| reg.path_id.clone())
                    .unwrap_or_else(|| format!("client_{}", conn)),
            },
        };

        if table
            .clients
            .get(&client_id)
            .is_some_and(|owner| *owner != conn)
        {
            return Registered::Duplicate(client_id);
        }

        table.clients.insert(client_id.clone(), conn);
        if let Some(reg) = table.connections.get_mut(&conn) {
            reg.client_id = Some(client_id.clone());
        }
        Registered::Client(client_id)
    }

    async fn on_message(self: &Arc<Self>, conn: ConnId, text: &str) {
        let msg = match WireMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Discarding malformed signaling message from {}: {}", conn, e);
                return;
            }
        };

        let sender = match self.register(conn, &msg) {
            Registered::Client(id) => id,
            Registered::Duplicate(id) => {
                warn!("Client id {} already registered, rejecting connection {}", id, conn);
                if let Some(tx) = self.table.lock().sender(conn) {
                    let _ = tx.send(busy_message(&id));
                }
                self.events
                    .publish(StreamEvent::ViewerRejected { client_id: id });
                return;
            }
            Registered::Gone => return,
        };

        match msg.kind() {
            TYPE_REQUEST => self.on_request(conn, sender),
            TYPE_ANSWER => self.on_answer(&sender, &msg).await,
            TYPE_CANDIDATE if msg.id().map_or(true, |dest| dest == SERVER_ID) => {
                if let Some(candidate) = msg.candidate() {
                    self.session
                        .add_remote_candidate(candidate, msg.mid().map(str::to_string))
                        .await;
                }
            }
            _ => self.relay(&sender, &msg),
        }
    }

    fn on_request(self: &Arc<Self>, conn: ConnId, client_id: String) {
        let tx = {
            let mut table = self.table.lock();
            let owner = table
                .active_client
                .clone()
                .filter(|owner| *owner != client_id && table.clients.contains_key(owner));

            if let Some(owner) = owner {
                warn!(
                    "Viewer {} requested a stream while {} owns the session",
                    client_id, owner
                );
                if let Some(tx) = table.sender(conn) {
                    let _ = tx.send(busy_message(&client_id));
                }
                drop(table);
                self.events
                    .publish(StreamEvent::ViewerRejected { client_id });
                return;
            }

            table.active_client = Some(client_id.clone());
            table.sender(conn)
        };

        let Some(tx) = tx else {
            return;
        };

        info!("Viewer {} requested the stream", client_id);
        self.events.publish(StreamEvent::ViewerConnected {
            client_id: client_id.clone(),
        });

        // Description may lag track setup; wait for it off the socket task
        let session = self.session.clone();
        let retry = self.retry;
        tokio::spawn(async move {
            match wait_for_description(&session, retry).await {
                Some(sdp) => {
                    debug!("Sending offer to {}", client_id);
                    let _ = tx.send(offer_message(&client_id, &sdp));
                }
                None => warn!(
                    "No local description after {:?}, dropping request from {}",
                    retry.budget(),
                    client_id
                ),
            }
        });
    }

    async fn on_answer(&self, sender: &str, msg: &WireMessage) {
        let owner = self.table.lock().active_client.clone();
        if owner.as_deref().is_some_and(|owner| owner != sender) {
            warn!("Ignoring answer from {} which does not own the session", sender);
            return;
        }
        match msg.sdp() {
            Some(sdp) => self.session.set_remote_description(sdp).await,
            None => warn!("Answer from {} carries no sdp", sender),
        }
    }

    fn relay(&self, sender: &str, msg: &WireMessage) {
        let Some(dest) = msg.id().filter(|dest| *dest != sender) else {
            debug!("Ignoring {} message from {}", msg.kind(), sender);
            return;
        };
        match self.table.lock().client_sender(dest) {
            Some(tx) => {
                let _ = tx.send(msg.relayed_from(sender));
            }
            None => warn!(
                "Relay of {} from {} dropped: {} is not connected",
                msg.kind(),
                sender,
                dest
            ),
        }
    }

    fn handle_disconnect(&self, conn: ConnId) {
        let (client_id, owned) = {
            let mut table = self.table.lock();
            let Some(reg) = table.connections.remove(&conn) else {
                return;
            };
            let Some(client_id) = reg.client_id else {
                debug!("Unregistered signaling connection {} closed", conn);
                return;
            };
            table.clients.remove(&client_id);

            // Viewers turned away as busy never owned the session
            let owned = match &table.active_client {
                Some(owner) if *owner == client_id => {
                    table.active_client = None;
                    true
                }
                Some(_) => false,
                None => true,
            };
            (client_id, owned)
        };

        info!("Viewer {} disconnected", client_id);
        self.events.publish(StreamEvent::ViewerDisconnected {
            client_id: client_id.clone(),
        });
        if owned {
            (self.on_disconnect)(client_id);
        }
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// WebSocket rendezvous service
pub struct SignalingService {
    inner: Arc<ServiceInner>,
    server: tokio::sync::Mutex<Option<RunningServer>>,
}

impl SignalingService {
    pub fn new(
        session: Arc<PeerSession>,
        retry: DescriptionRetry,
        events: Arc<EventBus>,
        on_disconnect: DisconnectCallback,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                session,
                retry,
                events,
                on_disconnect,
                table: parking_lot::Mutex::new(RegistrationTable::default()),
                next_conn: AtomicU64::new(1),
            }),
            server: tokio::sync::Mutex::new(None),
        }
    }

    /// Bind the listener and start accepting viewers. No-op when running.
    pub async fn start(&self, ip: &str, port: u16) -> Result<()> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind((ip, port)).await.map_err(|e| {
            AppError::RuntimeError(format!(
                "Failed to bind signaling server on {}:{}: {}",
                ip, port, e
            ))
        })?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/", get(ws_root))
            .route("/:client_id", get(ws_client))
            .layer(TraceLayer::new_for_http())
            .with_state(self.inner.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!("Signaling server exited with error: {}", e);
            }
        });

        info!("Signaling server listening on ws://{}", addr);
        *server = Some(RunningServer {
            addr,
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop accepting viewers and drop every registration
    pub async fn stop(&self) {
        let running = self.server.lock().await.take();

        // Dropping the senders ends each socket's writer task
        *self.inner.table.lock() = RegistrationTable::default();

        let Some(running) = running else {
            return;
        };
        let _ = running.shutdown.send(());
        let mut handle = running.handle;
        if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            warn!("Signaling server did not stop in time, aborting");
            handle.abort();
        }
        info!("Signaling server on {} stopped", running.addr);
    }

    pub async fn is_running(&self) -> bool {
        self.server.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.addr)
    }

    /// Feed one connection event through the dispatcher
    pub async fn dispatch(&self, event: SignalingEvent) {
        self.inner.dispatch(event).await;
    }

    /// Allocate an identity for a new wire connection
    pub fn next_conn_id(&self) -> ConnId {
        self.inner.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    pub fn registered_clients(&self) -> Vec<String> {
        self.inner.table.lock().clients.keys().cloned().collect()
    }

    pub fn active_client(&self) -> Option<String> {
        self.inner.table.lock().active_client.clone()
    }
}

async fn ws_root(ws: WebSocketUpgrade, State(inner): State<Arc<ServiceInner>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, inner, None))
}

async fn ws_client(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(inner): State<Arc<ServiceInner>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, inner, Some(client_id)))
}

async fn handle_socket(socket: WebSocket, inner: Arc<ServiceInner>, path_id: Option<String>) {
    let conn = inner.next_conn.fetch_add(1, Ordering::Relaxed);
    debug!("Signaling socket {} connected", conn);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    inner
        .dispatch(SignalingEvent::Connected { conn, tx, path_id })
        .await;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                inner.dispatch(SignalingEvent::Message { conn, text }).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Signaling socket {} error: {}", conn, e);
                break;
            }
        }
    }

    inner.dispatch(SignalingEvent::Disconnected { conn }).await;
    writer.abort();
}
