//! Test doubles for the store integration tests
//!
//! `FakeTransport` stands in for the Socket.IO channel and `FakeApi` for the
//! REST backend. Both record what the store asked of them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use squatfit_client::api_client::ThreadApi;
use squatfit_client::stores::{ConversationStore, StoreOptions};
use squatfit_client::ws::{
    ChannelHook, ChannelSettings, ConnectionState, SocketConfig, Transport, TransportError,
    TransportEvent,
};
use squatfit_client::{SessionToken, StoreTimings};
use squatfit_shared::{
    ApiError, ChannelRole, Conversation, HistoryRequest, Message, MessageEcho, OutgoingMessage,
    Platform, ServerEvent, Thread,
};
use tokio::sync::broadcast;

pub const STAFF_ID: &str = "coach-1";

// --- Transport ---

#[derive(Default)]
struct TransportLog {
    config: Option<SocketConfig>,
    sent: Vec<OutgoingMessage>,
    history_requests: Vec<HistoryRequest>,
    registrations: Vec<Vec<String>>,
    socket_histories: HashMap<String, Value>,
}

pub struct FakeTransport {
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<TransportEvent>,
    log: Mutex<TransportLog>,
    next_id: AtomicU64,
    fail_sends: AtomicBool,
    send_delay: Mutex<Duration>,
    early_echo: Mutex<Option<chrono::Duration>>,
    connects: AtomicU64,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            log: Mutex::new(TransportLog::default()),
            next_id: AtomicU64::new(1),
            fail_sends: AtomicBool::new(false),
            send_delay: Mutex::new(Duration::ZERO),
            early_echo: Mutex::new(None),
            connects: AtomicU64::new(0),
        })
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Deliver a server event by name, exactly as the wire decoder would.
    pub fn push(&self, name: &str, payload: Value) {
        let event = ServerEvent::from_event(name, payload).expect("valid server event");
        self.emit(TransportEvent::Server(event));
    }

    pub fn push_notification(&self, chat_id: &str, sender: &str, content: &str, at: DateTime<Utc>) {
        self.push(
            "notification",
            json!({
                "type": "new_message",
                "data": {
                    "chatId": chat_id,
                    "message": content,
                    "userId": sender,
                    "timestamp": at.to_rfc3339(),
                }
            }),
        );
    }

    pub fn drop_connection(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
        self.emit(TransportEvent::Disconnected {
            reason: "transport close".to_string(),
        });
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    /// Broadcast the `message` echo before the send delay elapses, stamped
    /// `skew` away from the local clock.
    pub fn set_early_echo(&self, skew: chrono::Duration) {
        *self.early_echo.lock() = Some(skew);
    }

    /// Answer `get_messages_history` for `chat_id` with this payload.
    pub fn set_socket_history(&self, chat_id: &str, payload: Value) {
        self.log
            .lock()
            .socket_histories
            .insert(chat_id.to_string(), payload);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.log.lock().sent.clone()
    }

    pub fn history_requests(&self) -> Vec<HistoryRequest> {
        self.log.lock().history_requests.clone()
    }

    pub fn registrations(&self) -> Vec<Vec<String>> {
        self.log.lock().registrations.clone()
    }

    pub fn last_config(&self) -> Option<SocketConfig> {
        self.log.lock().config.clone()
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, config: SocketConfig) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.log.lock().config = Some(config);
        *self.state.lock() = ConnectionState::Connected;
        self.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn send_message(&self, payload: OutgoingMessage) -> Result<MessageEcho, TransportError> {
        if !self.state.lock().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.log.lock().sent.push(payload.clone());

        let from = self
            .log
            .lock()
            .config
            .as_ref()
            .map(|c| c.user_id.clone())
            .unwrap_or_default();
        let early_echo = *self.early_echo.lock();
        let echo = MessageEcho {
            id: format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            chat_id: payload.chat_id,
            from,
            message: payload.message,
            timestamp: Utc::now() + early_echo.unwrap_or_else(chrono::Duration::zero),
        };
        if early_echo.is_some() {
            self.emit(TransportEvent::Server(ServerEvent::Message(echo.clone())));
        }

        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout);
        }

        if early_echo.is_none() {
            self.emit(TransportEvent::Server(ServerEvent::Message(echo.clone())));
        }
        Ok(echo)
    }

    async fn request_history(&self, request: HistoryRequest) -> Result<(), TransportError> {
        if !self.state.lock().is_connected() {
            return Err(TransportError::NotConnected);
        }
        let answer = {
            let mut log = self.log.lock();
            log.history_requests.push(request.clone());
            log.socket_histories.get(&request.chat_id).cloned()
        };
        if let Some(payload) = answer {
            self.push("messages_history", payload);
        }
        Ok(())
    }

    async fn register(&self, conversation_ids: Vec<String>) -> Result<(), TransportError> {
        self.log.lock().registrations.push(conversation_ids);
        Ok(())
    }

    fn disconnect(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

// --- REST ---

struct ApiState<T> {
    threads: Vec<T>,
    histories: HashMap<String, Vec<Message>>,
    delays: HashMap<String, Duration>,
    list_error: Option<ApiError>,
    fail_mark_read: bool,
    message_calls: Vec<String>,
    mark_read_calls: Vec<String>,
}

pub struct FakeApi<T> {
    state: Mutex<ApiState<T>>,
}

impl<T: Thread> FakeApi<T> {
    pub fn new(threads: Vec<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ApiState {
                threads,
                histories: HashMap::new(),
                delays: HashMap::new(),
                list_error: None,
                fail_mark_read: false,
                message_calls: Vec::new(),
                mark_read_calls: Vec::new(),
            }),
        })
    }

    pub fn set_history(&self, thread_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .histories
            .insert(thread_id.to_string(), messages);
    }

    pub fn set_history_delay(&self, thread_id: &str, delay: Duration) {
        self.state.lock().delays.insert(thread_id.to_string(), delay);
    }

    pub fn fail_list(&self, err: ApiError) {
        self.state.lock().list_error = Some(err);
    }

    pub fn fail_mark_read(&self, fail: bool) {
        self.state.lock().fail_mark_read = fail;
    }

    pub fn message_calls(&self) -> Vec<String> {
        self.state.lock().message_calls.clone()
    }

    pub fn mark_read_calls(&self) -> Vec<String> {
        self.state.lock().mark_read_calls.clone()
    }
}

#[async_trait]
impl<T: Thread> ThreadApi<T> for FakeApi<T> {
    async fn list(&self) -> Result<Vec<T>, ApiError> {
        let state = self.state.lock();
        if let Some(err) = &state.list_error {
            return Err(err.clone());
        }
        Ok(state.threads.clone())
    }

    async fn messages(&self, thread_id: &str) -> Result<Vec<Message>, ApiError> {
        let delay = {
            let mut state = self.state.lock();
            state.message_calls.push(thread_id.to_string());
            state.delays.get(thread_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state
            .lock()
            .histories
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(&self, thread_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.mark_read_calls.push(thread_id.to_string());
        if state.fail_mark_read {
            return Err(ApiError::Http {
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(())
    }
}

// --- Fixtures ---

pub fn conversation(
    id: &str,
    user_id: &str,
    unread: u32,
    updated_at: DateTime<Utc>,
) -> Conversation {
    Conversation {
        id: id.to_string(),
        user_id: user_id.to_string(),
        professional_id: Some(STAFF_ID.to_string()),
        unread_count: unread,
        last_message: None,
        updated_at,
        created_at: updated_at,
        is_active: true,
    }
}

pub fn message(id: &str, chat_id: &str, sender: &str, content: &str, at: DateTime<Utc>) -> Message {
    Message::text(id, chat_id, sender, content, at)
}

pub fn options() -> StoreOptions {
    StoreOptions {
        user_id: STAFF_ID.to_string(),
        history_source: Default::default(),
        timings: StoreTimings::default(),
    }
}

pub fn hook(transport: Arc<FakeTransport>) -> ChannelHook {
    let mut settings = ChannelSettings::new(
        "http://localhost:3001",
        ChannelRole::Coach,
        Platform::Web,
        STAFF_ID,
    );
    settings.auto_connect = false;
    ChannelHook::new(
        transport,
        Arc::new(SessionToken::new(Some("token".to_string()))),
        settings,
    )
}

/// A started store over fakes, connected and with its threads loaded.
pub async fn connected_store<T: Thread>(
    api: Arc<FakeApi<T>>,
    options: StoreOptions,
) -> (ConversationStore<T>, Arc<FakeTransport>) {
    let transport = FakeTransport::new();
    let store = ConversationStore::new(api, hook(transport.clone()), options);
    store.start();
    store.channel().connect().await.expect("fake connect");
    store.load_conversations().await.expect("fake list");
    settle().await;
    (store, transport)
}

/// Let spawned tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
