//! Socket.IO client over tokio-tungstenite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use squatfit_shared::socketio::{EngineOpen, EnginePacket, PacketKind, SocketPacket};
use squatfit_shared::{
    events, HistoryRequest, MessageEcho, OutgoingMessage, Registration, ServerEvent,
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{ConnectionState, SocketConfig, Transport, TransportError, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsRead = SplitStream<WsStream>;
type WsWrite = SplitSink<WsStream, Message>;

const EVENT_CAPACITY: usize = 256;

struct PendingSend {
    chat_id: String,
    content: String,
    reply: oneshot::Sender<Result<MessageEcho, TransportError>>,
}

/// The live half of a connection.
struct Session {
    id: u64,
    namespace: &'static str,
    writer: UnboundedSender<String>,
    reader: JoinHandle<()>,
    registration: Registration,
    send_timeout: Duration,
}

struct Shared {
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
    pending: Mutex<HashMap<u64, PendingSend>>,
    events: broadcast::Sender<TransportEvent>,
    next_ack: AtomicU64,
    next_session: AtomicU64,
    /// Bumped by `disconnect()` so an in-flight `connect()` does not install
    /// its session afterwards.
    epoch: AtomicU64,
}

/// A Socket.IO channel on one namespace.
pub struct SocketIoTransport {
    shared: Arc<Shared>,
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketIoTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                events,
                next_ack: AtomicU64::new(0),
                next_session: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    async fn open(&self, config: &SocketConfig, epoch: u64) -> Result<(), TransportError> {
        let url = socket_url(&config.url)?;
        let namespace = config.role.namespace();
        tracing::info!("Connecting {} channel to {}", config.role, url);

        let (ws, _response) =
            tokio::time::timeout(config.handshake_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::Io(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let open = tokio::time::timeout(
            config.handshake_timeout,
            handshake(&mut read, &mut write, namespace, &config.token),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        if self.shared.epoch.load(Ordering::SeqCst) != epoch {
            let _ = write.close().await;
            return Err(TransportError::Closed);
        }

        let (writer, frames) = unbounded();
        tokio::spawn(write_loop(write, frames));

        let session_id = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        let liveness = Duration::from_millis(open.ping_interval + open.ping_timeout);
        let reader = tokio::spawn(read_loop(
            self.shared.clone(),
            session_id,
            read,
            writer.clone(),
            namespace,
            liveness,
        ));

        let registration = Registration {
            user_id: config.user_id.clone(),
            role: config.role,
            platform: config.platform,
            conversation_ids: config.conversation_ids.clone(),
        };

        *self.shared.session.lock() = Some(Session {
            id: session_id,
            namespace,
            writer,
            reader,
            registration: registration.clone(),
            send_timeout: config.send_timeout,
        });
        *self.shared.state.lock() = ConnectionState::Connected;
        tracing::info!("Socket {} connected (sid {})", namespace, open.sid);
        self.shared.publish(TransportEvent::Connected);

        self.shared.emit(
            config.role.register_event(),
            to_payload(&registration)?,
            None,
        )
    }
}

impl Shared {
    fn publish(&self, event: TransportEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit(&self, name: &str, payload: Value, ack_id: Option<u64>) -> Result<(), TransportError> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(TransportError::NotConnected)?;
        let packet = SocketPacket::event(session.namespace, name, payload, ack_id);
        let frame = EnginePacket::Message(packet.encode()).encode();
        session
            .writer
            .unbounded_send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    /// Returns a reason when the packet ends the session.
    fn dispatch(&self, namespace: &str, body: &str) -> Option<String> {
        let packet = match SocketPacket::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping undecodable packet: {e}");
                return None;
            }
        };
        if packet.namespace != namespace {
            return None;
        }

        match packet.kind {
            PacketKind::Event => {
                let (name, payload) = packet.event_parts()?;
                match ServerEvent::from_event(name, payload) {
                    Ok(event) => {
                        if let ServerEvent::Message(echo) = &event {
                            self.resolve_echo(echo);
                        }
                        self.publish(TransportEvent::Server(event));
                    }
                    Err(e) => tracing::warn!("Undecodable '{name}' event: {e}"),
                }
                None
            }
            PacketKind::Ack => {
                if let (Some(id), Some(payload)) = (packet.ack_id, packet.ack_payload()) {
                    self.resolve_ack(id, &payload);
                }
                None
            }
            PacketKind::Disconnect => Some("disconnected by server".to_string()),
            PacketKind::ConnectError => packet.connect_error_message(),
            _ => None,
        }
    }

    fn resolve_echo(&self, echo: &MessageEcho) {
        let mut pending = self.pending.lock();
        let key = pending
            .iter()
            .find(|(_, p)| p.chat_id == echo.chat_id && p.content == echo.message)
            .map(|(id, _)| *id);
        if let Some(send) = key.and_then(|id| pending.remove(&id)) {
            let _ = send.reply.send(Ok(echo.clone()));
        }
    }

    fn resolve_ack(&self, ack_id: u64, payload: &Value) {
        let Some(outcome) = ack_outcome(payload) else {
            // Plain `{ success: true }`: the `message` echo resolves the send.
            return;
        };
        if let Some(send) = self.pending.lock().remove(&ack_id) {
            let _ = send.reply.send(outcome);
        }
    }

    fn session_ended(&self, session_id: u64, reason: String) {
        let ended = {
            let mut session = self.session.lock();
            if session.as_ref().map(|s| s.id) == Some(session_id) {
                session.take()
            } else {
                None
            }
        };
        if ended.is_none() {
            return;
        }
        tracing::info!("Socket session ended: {reason}");
        // Dropping the reply senders fails waiting sends with `Closed`.
        self.pending.lock().clear();
        *self.state.lock() = ConnectionState::Disconnected;
        self.publish(TransportEvent::Disconnected { reason });
    }
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn connect(&self, config: SocketConfig) -> Result<(), TransportError> {
        {
            let mut state = self.shared.state.lock();
            if state.is_connected() || state.is_connecting() {
                tracing::debug!("connect() ignored, socket is {:?}", *state);
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }
        let epoch = self.shared.epoch.load(Ordering::SeqCst);

        match self.open(&config, epoch).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Socket connect failed: {e}");
                if self.shared.epoch.load(Ordering::SeqCst) == epoch {
                    *self.shared.state.lock() = ConnectionState::Failed {
                        reason: e.to_string(),
                    };
                }
                self.shared.publish(TransportEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn send_message(&self, payload: OutgoingMessage) -> Result<MessageEcho, TransportError> {
        let (reply, response) = oneshot::channel();
        let ack_id = self.shared.next_ack.fetch_add(1, Ordering::SeqCst);
        let send_timeout = {
            let session = self.shared.session.lock();
            session
                .as_ref()
                .ok_or(TransportError::NotConnected)?
                .send_timeout
        };

        self.shared.pending.lock().insert(
            ack_id,
            PendingSend {
                chat_id: payload.chat_id.clone(),
                content: payload.message.clone(),
                reply,
            },
        );

        if let Err(e) = self
            .shared
            .emit(events::SEND_MESSAGE, to_payload(&payload)?, Some(ack_id))
        {
            self.shared.pending.lock().remove(&ack_id);
            return Err(e);
        }

        match tokio::time::timeout(send_timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&ack_id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn request_history(&self, request: HistoryRequest) -> Result<(), TransportError> {
        self.shared
            .emit(events::GET_MESSAGES_HISTORY, to_payload(&request)?, None)
    }

    async fn register(&self, conversation_ids: Vec<String>) -> Result<(), TransportError> {
        let (event, registration) = {
            let mut session = self.shared.session.lock();
            let session = session.as_mut().ok_or(TransportError::NotConnected)?;
            session.registration.conversation_ids = conversation_ids;
            (
                session.registration.role.register_event(),
                session.registration.clone(),
            )
        };
        self.shared.emit(event, to_payload(&registration)?, None)
    }

    fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let session = self.shared.session.lock().take();
        let was_live = session.is_some();

        if let Some(session) = session {
            let bye = EnginePacket::Message(SocketPacket::disconnect(session.namespace).encode());
            let _ = session.writer.unbounded_send(bye.encode());
            // Stops the liveness watchdog; the writer flushes and closes once
            // its last sender is gone.
            session.reader.abort();
        }

        self.shared.pending.lock().clear();
        let changed = {
            let mut state = self.shared.state.lock();
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        };
        if was_live || changed {
            self.shared.publish(TransportEvent::Disconnected {
                reason: "client disconnect".to_string(),
            });
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        if self.shared.session.lock().is_some() {
            self.disconnect();
        }
    }
}

async fn handshake(
    read: &mut WsRead,
    write: &mut WsWrite,
    namespace: &str,
    token: &str,
) -> Result<EngineOpen, TransportError> {
    let open = loop {
        match next_engine_packet(read).await? {
            EnginePacket::Open(open) => break open,
            EnginePacket::Ping(data) => send_frame(write, EnginePacket::Pong(data).encode()).await?,
            other => tracing::debug!("Ignoring {:?} before open", other),
        }
    };

    let connect = SocketPacket::connect(namespace, Some(json!({ "token": token })));
    send_frame(write, EnginePacket::Message(connect.encode()).encode()).await?;

    loop {
        match next_engine_packet(read).await? {
            EnginePacket::Message(body) => {
                let packet = SocketPacket::decode(&body)
                    .map_err(|e| TransportError::Protocol(e.to_string()))?;
                if packet.namespace != namespace {
                    continue;
                }
                match packet.kind {
                    PacketKind::Connect => return Ok(open),
                    PacketKind::ConnectError => {
                        let reason = packet.connect_error_message().unwrap_or_default();
                        return Err(classify_connect_error(reason));
                    }
                    _ => {}
                }
            }
            EnginePacket::Ping(data) => send_frame(write, EnginePacket::Pong(data).encode()).await?,
            EnginePacket::Close => return Err(TransportError::Closed),
            _ => {}
        }
    }
}

async fn next_engine_packet(read: &mut WsRead) -> Result<EnginePacket, TransportError> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                return EnginePacket::decode(text.as_str())
                    .map_err(|e| TransportError::Protocol(e.to_string()))
            }
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
        }
    }
}

async fn send_frame(write: &mut WsWrite, frame: String) -> Result<(), TransportError> {
    write
        .send(Message::Text(frame.into()))
        .await
        .map_err(|e| TransportError::Io(e.to_string()))
}

async fn write_loop(mut write: WsWrite, mut frames: UnboundedReceiver<String>) {
    while let Some(frame) = frames.next().await {
        tracing::debug!("Socket send: {frame}");
        if let Err(e) = write.send(Message::Text(frame.into())).await {
            tracing::error!("Socket send failed: {e}");
            break;
        }
    }
    let _ = write.close().await;
}

async fn read_loop(
    shared: Arc<Shared>,
    session_id: u64,
    mut read: WsRead,
    writer: UnboundedSender<String>,
    namespace: &'static str,
    liveness: Duration,
) {
    let reason = loop {
        let next = match tokio::time::timeout(liveness, read.next()).await {
            Ok(next) => next,
            Err(_) => break "ping timeout".to_string(),
        };
        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break format!("read error: {e}"),
        };
        tracing::debug!("Socket received: {}", text.as_str());

        match EnginePacket::decode(text.as_str()) {
            Ok(EnginePacket::Ping(data)) => {
                let _ = writer.unbounded_send(EnginePacket::Pong(data).encode());
            }
            Ok(EnginePacket::Close) => break "closed by server".to_string(),
            Ok(EnginePacket::Message(body)) => {
                if let Some(reason) = shared.dispatch(namespace, &body) {
                    break reason;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Dropping undecodable frame: {e}"),
        }
    };
    shared.session_ended(session_id, reason);
}

fn ack_outcome(payload: &Value) -> Option<Result<MessageEcho, TransportError>> {
    if let Ok(echo) = serde_json::from_value::<MessageEcho>(payload.clone()) {
        return Some(Ok(echo));
    }
    if let Some(echo) = payload
        .get("data")
        .and_then(|data| serde_json::from_value::<MessageEcho>(data.clone()).ok())
    {
        return Some(Ok(echo));
    }
    let failed = payload.get("success").and_then(Value::as_bool) == Some(false);
    let error = payload.get("error").or_else(|| failed.then(|| payload.get("message")).flatten());
    match error {
        Some(Value::String(msg)) => Some(Err(TransportError::Protocol(msg.clone()))),
        Some(_) => Some(Err(TransportError::Protocol("send rejected".to_string()))),
        None if failed => Some(Err(TransportError::Protocol("send rejected".to_string()))),
        None => None,
    }
}

fn classify_connect_error(reason: String) -> TransportError {
    let lower = reason.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("token") || lower.contains("auth") {
        TransportError::Unauthorized
    } else {
        TransportError::Handshake(reason)
    }
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<Value, TransportError> {
    serde_json::to_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// `<base>/socket.io/?EIO=4&transport=websocket` with a ws(s) scheme.
fn socket_url(base: &str) -> Result<url::Url, TransportError> {
    let mut url = url::Url::parse(base)
        .map_err(|e| TransportError::Handshake(format!("invalid socket url {base}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Handshake(format!(
                "unsupported socket scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Handshake(format!("cannot use scheme {scheme}")))?;
    let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}
