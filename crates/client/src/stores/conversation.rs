//! Client-side view of conversations (chat) and tickets (support).
//!
//! The store merges REST-fetched history with socket pushes, deduplicates
//! repeat deliveries, performs optimistic sends and keeps unread counters
//! in step with mark-as-read calls. All cache mutation goes through this
//! type; consumers read [`StoreSnapshot`]s.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use squatfit_shared::{
    ApiError, Conversation, DeliveryState, HistoryRequest, Message, MessagesHistory,
    OutgoingMessage, ServerEvent, Thread, Ticket, PUSH_ID_PREFIX, TEMP_ID_PREFIX,
};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::dedup::BoundedSet;
use super::messages::MessageCache;
use super::selection::{SelectDecision, Selection, SelectionPhase};
use super::throttle::MarkReadThrottle;
use crate::api_client::ThreadApi;
use crate::config::{HistorySource, StoreTimings};
use crate::ws::{ChannelHook, ConnectionState, TransportError, TransportEvent};

pub type ChatStore = ConversationStore<Conversation>;
pub type SupportStore = ConversationStore<Ticket>;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not connected to the chat server")]
    NotConnected,
    #[error("conversation {0} not found")]
    NotFound(String),
    #[error("no conversation selected")]
    NoSelection,
    #[error("session expired or missing")]
    Unauthorized,
    #[error("{0}")]
    Network(String),
    #[error("a message is already being sent")]
    SendInFlight,
    #[error("no failed message with id {0}")]
    UnknownMessage(String),
}

impl From<ApiError> for StoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => StoreError::Unauthorized,
            other => StoreError::Network(other.user_message()),
        }
    }
}

impl From<TransportError> for StoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => StoreError::NotConnected,
            TransportError::Unauthorized => StoreError::Unauthorized,
            other => StoreError::Network(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A transient user-facing notification (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Derived state changed; take a new snapshot.
    Updated,
    Toast(Notice),
}

/// Read-only view handed to consumers.
#[derive(Debug, Clone)]
pub struct StoreSnapshot<T> {
    /// Most recently updated first.
    pub threads: Vec<T>,
    pub selected_id: Option<String>,
    /// Messages of the selected thread, oldest first.
    pub messages: Vec<Message>,
    pub phase: SelectionPhase,
    pub is_loading: bool,
    pub error: Option<String>,
    pub connection: ConnectionState,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// The signed-in professional or agent; sender of outgoing messages.
    pub user_id: String,
    pub history_source: HistorySource,
    pub timings: StoreTimings,
}

impl StoreOptions {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            history_source: HistorySource::default(),
            timings: StoreTimings::default(),
        }
    }
}

/// A message delivered by the socket, before normalization.
struct Push {
    key: String,
    id: Option<String>,
    chat_id: String,
    content: String,
    sender_id: String,
    at: DateTime<Utc>,
}

/// Monotonic `temp-<millis>` ids, unique within the session.
#[derive(Debug, Default)]
struct TempIds {
    last: i64,
}

impl TempIds {
    fn next(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        format!("{TEMP_ID_PREFIX}{}", self.last)
    }
}

struct State<T> {
    threads: Vec<T>,
    threads_loaded: bool,
    loading_threads: bool,
    cache: MessageCache,
    selection: Selection,
    error: Option<String>,
    processed: BoundedSet,
    throttle: MarkReadThrottle,
    sending: bool,
    temp_ids: TempIds,
    push_counter: u64,
    mark_read_generation: u64,
}

impl<T: Thread> State<T> {
    fn thread_mut(&mut self, id: &str) -> Option<&mut T> {
        self.threads.iter_mut().find(|t| t.id() == id)
    }

    fn thread(&self, id: &str) -> Option<&T> {
        self.threads.iter().find(|t| t.id() == id)
    }

    fn has_unread_selection(&self, id: &str) -> bool {
        self.selection.is_selected(id) && self.thread(id).is_some_and(|t| t.unread_count() > 0)
    }

    fn next_push_id(&mut self) -> String {
        let id = format!(
            "{PUSH_ID_PREFIX}{}-{}",
            Utc::now().timestamp_millis(),
            self.push_counter
        );
        self.push_counter += 1;
        id
    }

    fn sort_threads(&mut self) {
        self.threads.sort_by_key(|t| std::cmp::Reverse(t.updated_at()));
    }
}

struct Inner<T: Thread> {
    api: Arc<dyn ThreadApi<T>>,
    channel: ChannelHook,
    options: StoreOptions,
    state: Mutex<State<T>>,
    events: broadcast::Sender<StoreEvent>,
    history_waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Vec<Message>>>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Thread> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

/// Resets the send re-entrancy flag however the send ends.
struct SendGuard<'a, T: Thread> {
    state: &'a Mutex<State<T>>,
}

impl<T: Thread> Drop for SendGuard<'_, T> {
    fn drop(&mut self) {
        self.state.lock().sending = false;
    }
}

/// Conversation store handle. Clones share the same state.
pub struct ConversationStore<T: Thread> {
    inner: Arc<Inner<T>>,
}

impl<T: Thread> Clone for ConversationStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Thread> ConversationStore<T> {
    pub fn new(api: Arc<dyn ThreadApi<T>>, channel: ChannelHook, options: StoreOptions) -> Self {
        let timings = &options.timings;
        let state = State {
            threads: Vec::new(),
            threads_loaded: false,
            loading_threads: false,
            cache: MessageCache::default(),
            selection: Selection::default(),
            error: None,
            processed: BoundedSet::new(timings.processed_capacity),
            throttle: MarkReadThrottle::new(
                timings.mark_read_min_interval,
                timings.mark_read_same_thread,
                timings.throttle_capacity,
            ),
            sending: false,
            temp_ids: TempIds::default(),
            push_counter: 0,
            mark_read_generation: 0,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                api,
                channel,
                options,
                state: Mutex::new(state),
                events,
                history_waiters: Mutex::new(HashMap::new()),
                pump: Mutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    fn weak(&self) -> Weak<Inner<T>> {
        Arc::downgrade(&self.inner)
    }

    /// Start the channel hook and apply its events to the store.
    pub fn start(&self) {
        let mut pump = self.inner.pump.lock();
        if pump.is_some() {
            return;
        }
        let mut events = self.inner.channel.subscribe();
        self.inner.channel.start();

        let weak = self.weak();
        *pump = Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Store lagged behind the socket, skipped {skipped} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ConversationStore::from_inner(inner).handle_transport_event(event);
            }
        }));
    }

    /// Stop the event pump and disconnect the channel.
    pub fn shutdown(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.inner.channel.disconnect();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn channel(&self) -> &ChannelHook {
        &self.inner.channel
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.channel.state()
    }

    pub fn snapshot(&self) -> StoreSnapshot<T> {
        let state = self.inner.state.lock();
        let selected_id = state.selection.selected().map(str::to_string);
        let messages = selected_id
            .as_deref()
            .and_then(|id| state.cache.get(id))
            .map(|t| t.messages.clone())
            .unwrap_or_default();
        let phase = state.selection.phase().clone();

        StoreSnapshot {
            threads: state.threads.clone(),
            selected_id,
            messages,
            is_loading: state.loading_threads || matches!(phase, SelectionPhase::Loading { .. }),
            phase,
            error: state.error.clone(),
            connection: self.inner.channel.state(),
        }
    }

    /// Cached messages of any thread, selected or not.
    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        self.inner
            .state
            .lock()
            .cache
            .get(thread_id)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    pub fn thread(&self, thread_id: &str) -> Option<T> {
        self.inner.state.lock().thread(thread_id).cloned()
    }

    fn notify(&self) {
        let _ = self.inner.events.send(StoreEvent::Updated);
    }

    /// Surface a failure through the error field and a toast. Missing or
    /// expired sessions are treated as "not logged in yet" and stay quiet.
    fn report(&self, err: &StoreError) {
        if matches!(err, StoreError::Unauthorized) {
            tracing::debug!("Suppressing unauthenticated error");
            return;
        }
        tracing::error!("{err}");
        let message = err.to_string();
        self.inner.state.lock().error = Some(message.clone());
        let _ = self.inner.events.send(StoreEvent::Toast(Notice {
            level: NoticeLevel::Error,
            message,
        }));
        self.notify();
    }

    // --- Threads ---

    /// Fetch the thread list and re-register the assigned ids on the socket.
    pub async fn load_conversations(&self) -> Result<(), StoreError> {
        self.inner.state.lock().loading_threads = true;
        self.notify();

        match self.inner.api.list().await {
            Ok(threads) => {
                let ids: Vec<String> = {
                    let mut state = self.inner.state.lock();
                    state.threads = threads;
                    state.sort_threads();
                    state.threads_loaded = true;
                    state.loading_threads = false;
                    state.error = None;
                    state.threads.iter().map(|t| t.id().to_string()).collect()
                };
                self.notify();
                tracing::info!("Loaded {} {}", ids.len(), T::RESOURCE);

                if let Err(e) = self.inner.channel.register(ids).await {
                    tracing::warn!("Re-registering {} failed: {e}", T::RESOURCE);
                }
                Ok(())
            }
            Err(e) => {
                self.inner.state.lock().loading_threads = false;
                let err = StoreError::from(e);
                self.report(&err);
                Err(err)
            }
        }
    }

    // --- Selection ---

    /// Select a thread and make sure its history is loaded.
    ///
    /// Only ids from the last [`load_conversations`](Self::load_conversations)
    /// can be selected; anything else, including every id before the first
    /// load, is [`StoreError::NotFound`].
    ///
    /// No-op when the thread is already selected and loaded, or while its own
    /// selection is still in flight. Selecting it again after a failed load
    /// fetches again. Selecting another thread supersedes a pending one; the
    /// superseded history still lands in the cache but never becomes the
    /// displayed list.
    pub async fn select_conversation(&self, id: &str) -> Result<(), StoreError> {
        let (ticket, cached) = {
            let mut state = self.inner.state.lock();
            if !state.threads_loaded || state.thread(id).is_none() {
                return Err(StoreError::NotFound(id.to_string()));
            }
            let cached = state.cache.is_loaded(id);
            let ticket = match state.selection.begin(id, cached) {
                SelectDecision::Unchanged => return Ok(()),
                SelectDecision::Begin(ticket) => ticket,
            };
            if cached {
                state.selection.finish(&ticket);
            }
            (ticket, cached)
        };
        self.notify();

        if cached {
            tracing::debug!("Cache hit for {id}");
            self.schedule_mark_read_if_unread(id);
            return Ok(());
        }

        tokio::time::sleep(self.inner.options.timings.selection_debounce).await;
        if !self.inner.state.lock().selection.start_loading(&ticket) {
            tracing::debug!("Selection of {id} superseded during debounce");
            return Ok(());
        }
        self.notify();

        match self.fetch_history(ticket.target()).await {
            Ok(batch) => {
                let current = {
                    let mut state = self.inner.state.lock();
                    let window = self.inner.options.timings.duplicate_window;
                    state.cache.entry(id).merge_history(batch, window);
                    let current = state.selection.finish(&ticket);
                    if current {
                        state.error = None;
                    }
                    current
                };
                self.notify();
                if current {
                    self.schedule_mark_read_if_unread(id);
                } else {
                    tracing::debug!("History for {id} arrived after it was deselected");
                }
                Ok(())
            }
            Err(err) => {
                let current = self.inner.state.lock().selection.finish(&ticket);
                if current {
                    self.report(&err);
                }
                Err(err)
            }
        }
    }

    pub fn deselect(&self) {
        self.inner.state.lock().selection.clear();
        self.notify();
    }

    async fn fetch_history(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        match self.inner.options.history_source {
            HistorySource::Rest => Ok(self.inner.api.messages(id).await?),
            HistorySource::Socket => self.fetch_socket_history(id).await,
        }
    }

    async fn fetch_socket_history(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        if !self.inner.channel.is_connected() {
            return Err(StoreError::NotConnected);
        }
        let (reply, response) = oneshot::channel();
        self.inner
            .history_waiters
            .lock()
            .entry(id.to_string())
            .or_default()
            .push(reply);

        let request = HistoryRequest {
            chat_id: id.to_string(),
            page: 1,
            limit: self.inner.options.timings.history_page_size,
        };
        let outcome = match self.inner.channel.transport().request_history(request).await {
            Ok(()) => {
                let timeout = self.inner.options.timings.history_timeout;
                match tokio::time::timeout(timeout, response).await {
                    Ok(Ok(batch)) => Ok(batch),
                    Ok(Err(_)) => Err(StoreError::Network("history request dropped".to_string())),
                    Err(_) => Err(StoreError::Network(format!(
                        "timed out loading history of {id}"
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        };

        if outcome.is_err() {
            let mut waiters = self.inner.history_waiters.lock();
            if let Some(pending) = waiters.get_mut(id) {
                pending.retain(|w| !w.is_closed());
                if pending.is_empty() {
                    waiters.remove(id);
                }
            }
        }
        outcome
    }

    // --- Socket events ---

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Server(ServerEvent::Message(echo)) => {
                self.apply_push(Push {
                    key: echo.dedup_key(),
                    id: Some(echo.id),
                    chat_id: echo.chat_id,
                    content: echo.message,
                    sender_id: echo.from,
                    at: echo.timestamp,
                });
            }
            TransportEvent::Server(ServerEvent::Notification(notification)) => {
                if let Some(data) = notification.new_message() {
                    let sender_id = data.sender_id().to_string();
                    self.apply_push(Push {
                        key: data.dedup_key(),
                        id: data.id,
                        chat_id: data.chat_id,
                        content: data.message,
                        sender_id,
                        at: data.timestamp,
                    });
                }
            }
            TransportEvent::Server(ServerEvent::MessagesHistory(history)) => {
                self.apply_socket_history(history);
            }
            TransportEvent::Server(ServerEvent::Error(err)) => {
                self.report(&StoreError::Network(err.message));
            }
            TransportEvent::Server(ServerEvent::Other { name, .. }) => {
                tracing::debug!("Ignoring '{name}' event");
            }
            TransportEvent::Connected
            | TransportEvent::Disconnected { .. }
            | TransportEvent::Error(_) => self.notify(),
        }
    }

    /// Reconcile one pushed message. Returns whether it was applied.
    fn apply_push(&self, push: Push) -> bool {
        let window = self.inner.options.timings.duplicate_window;
        let own = push.sender_id == self.inner.options.user_id;

        let selected = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.processed.contains(&push.key) {
                return false;
            }
            if let Some(thread) = state.cache.get(&push.chat_id) {
                let known_id = push.id.as_deref().is_some_and(|id| thread.contains(id));
                let own_pending = own && thread.has_pending_send(&push.content);
                if known_id
                    || own_pending
                    || thread.has_recent_duplicate(&push.content, &push.sender_id, push.at, window)
                {
                    tracing::debug!("Dropping duplicate push for {}", push.chat_id);
                    return false;
                }
            }

            let id = match push.id {
                Some(id) => id,
                None => state.next_push_id(),
            };
            let message = Message::text(id, &push.chat_id, &push.sender_id, push.content, push.at);
            let summary = message.summary();
            state.cache.entry(&push.chat_id).insert(message);

            let selected = state.selection.is_selected(&push.chat_id);
            if selected {
                if let Some(thread) = state.thread_mut(&push.chat_id) {
                    thread.set_last_message(summary);
                    if !own {
                        thread.set_unread_count(thread.unread_count() + 1);
                    }
                }
                state.sort_threads();
            }
            state.processed.insert(push.key);
            selected
        };

        self.notify();
        if selected && !own {
            self.schedule_mark_read_if_unread(&push.chat_id);
        }
        true
    }

    fn apply_socket_history(&self, history: MessagesHistory) {
        let chat_id = history.chat_id.clone();
        let batch = history.into_messages();
        let waiters = self.inner.history_waiters.lock().remove(&chat_id);

        match waiters {
            Some(waiters) if !waiters.is_empty() => {
                for waiter in waiters {
                    let _ = waiter.send(batch.clone());
                }
            }
            _ => {
                let window = self.inner.options.timings.duplicate_window;
                self.inner
                    .state
                    .lock()
                    .cache
                    .entry(&chat_id)
                    .merge_history(batch, window);
                self.notify();
            }
        }
    }

    // --- Sending ---

    /// Send `content` to the selected thread.
    ///
    /// The message appears immediately with a `temp-` id and is replaced in
    /// place by the server echo. On failure it stays in the list marked
    /// [`DeliveryState::Failed`]; see [`retry_message`](Self::retry_message)
    /// and [`discard_message`](Self::discard_message).
    pub async fn send_message(
        &self,
        content: &str,
        reply_to_message_id: Option<String>,
    ) -> Result<Message, StoreError> {
        let (payload, temp_id, _guard) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let chat_id = state
                .selection
                .selected()
                .map(str::to_string)
                .ok_or(StoreError::NoSelection)?;
            if state.sending {
                return Err(StoreError::SendInFlight);
            }
            if !self.inner.channel.is_connected() {
                return Err(StoreError::NotConnected);
            }
            let to = state
                .thread(&chat_id)
                .map(|t| t.user_id().to_string())
                .ok_or_else(|| StoreError::NotFound(chat_id.clone()))?;

            let temp_id = state.temp_ids.next();
            let mut temp = Message::text(
                &temp_id,
                &chat_id,
                &self.inner.options.user_id,
                content,
                Utc::now(),
            );
            temp.is_read = true;
            temp.reply_to_message_id = reply_to_message_id.clone();
            temp.delivery = DeliveryState::Pending;
            state.cache.entry(&chat_id).insert(temp);
            state.sending = true;

            let payload = OutgoingMessage {
                chat_id,
                to,
                message: content.to_string(),
                reply_to_message_id,
            };
            (payload, temp_id, SendGuard { state: &self.inner.state })
        };
        self.notify();

        self.deliver(payload, &temp_id).await
    }

    /// Resend a failed optimistic message, reconciling it in place.
    pub async fn retry_message(&self, temp_id: &str) -> Result<Message, StoreError> {
        let (payload, _guard) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.sending {
                return Err(StoreError::SendInFlight);
            }
            let unknown = || StoreError::UnknownMessage(temp_id.to_string());
            let chat_id = state
                .cache
                .find_thread_of(temp_id)
                .map(str::to_string)
                .ok_or_else(unknown)?;
            let failed = state
                .cache
                .get(&chat_id)
                .and_then(|t| t.get(temp_id))
                .filter(|m| m.delivery == DeliveryState::Failed)
                .cloned()
                .ok_or_else(unknown)?;
            if !self.inner.channel.is_connected() {
                return Err(StoreError::NotConnected);
            }
            let to = state
                .thread(&chat_id)
                .map(|t| t.user_id().to_string())
                .ok_or_else(|| StoreError::NotFound(chat_id.clone()))?;

            state
                .cache
                .entry(&chat_id)
                .set_delivery(temp_id, DeliveryState::Pending);
            state.sending = true;

            let payload = OutgoingMessage {
                chat_id,
                to,
                message: failed.content,
                reply_to_message_id: failed.reply_to_message_id,
            };
            (payload, SendGuard { state: &self.inner.state })
        };
        self.notify();

        self.deliver(payload, temp_id).await
    }

    /// Drop a failed optimistic message from the list.
    pub fn discard_message(&self, temp_id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.inner.state.lock();
            let chat_id = state
                .cache
                .find_thread_of(temp_id)
                .map(str::to_string)
                .ok_or_else(|| StoreError::UnknownMessage(temp_id.to_string()))?;
            let thread = state.cache.entry(&chat_id);
            if thread.get(temp_id).map(|m| m.delivery) != Some(DeliveryState::Failed) {
                return Err(StoreError::UnknownMessage(temp_id.to_string()));
            }
            thread.remove(temp_id);
        }
        self.notify();
        Ok(())
    }

    async fn deliver(
        &self,
        payload: OutgoingMessage,
        temp_id: &str,
    ) -> Result<Message, StoreError> {
        let chat_id = payload.chat_id.clone();
        let reply_to = payload.reply_to_message_id.clone();

        match self.inner.channel.transport().send_message(payload).await {
            Ok(echo) => {
                let key = echo.dedup_key();
                let mut confirmed = echo.into_message();
                confirmed.is_read = true;
                confirmed.reply_to_message_id = reply_to;
                {
                    let mut state = self.inner.state.lock();
                    state.cache.entry(&chat_id).reconcile(temp_id, confirmed.clone());
                    if let Some(thread) = state.thread_mut(&chat_id) {
                        thread.set_last_message(confirmed.summary());
                    }
                    state.sort_threads();
                    state.processed.insert(key);
                }
                self.notify();
                Ok(confirmed)
            }
            Err(e) => {
                tracing::warn!("Send to {chat_id} failed: {e}");
                self.inner
                    .state
                    .lock()
                    .cache
                    .entry(&chat_id)
                    .set_delivery(temp_id, DeliveryState::Failed);
                let err = StoreError::from(e);
                self.report(&err);
                Err(err)
            }
        }
    }

    // --- Read state ---

    fn schedule_mark_read_if_unread(&self, id: &str) {
        self.schedule_mark_read(id, self.inner.options.timings.mark_read_debounce);
    }

    /// Mark `id` read after `delay` if it is still selected and unread then.
    /// A newer schedule replaces a pending one.
    fn schedule_mark_read(&self, id: &str, delay: Duration) {
        let generation = {
            let mut state = self.inner.state.lock();
            if !state.has_unread_selection(id) {
                return;
            }
            state.mark_read_generation += 1;
            state.mark_read_generation
        };

        let weak = self.weak();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = ConversationStore::from_inner(inner);
            let due = {
                let state = store.inner.state.lock();
                state.mark_read_generation == generation && state.has_unread_selection(&id)
            };
            if !due {
                return;
            }
            if let Err(e) = store.mark_as_read(&id).await {
                tracing::warn!("Mark-as-read for {id} failed: {e}");
            }
        });
    }

    /// Mark the selected thread read. Returns `Ok(false)` when the call was
    /// skipped (not selected, or throttled). A throttled call for a thread
    /// that still has unread messages is retried once the window closes.
    /// Failures are not toasted; the throttle is rolled back so the next
    /// trigger retries.
    pub async fn mark_as_read(&self, id: &str) -> Result<bool, StoreError> {
        let acquired = {
            let mut state = self.inner.state.lock();
            if !state.selection.is_selected(id) {
                return Ok(false);
            }
            state.throttle.try_acquire(id, Instant::now())
        };
        let permit = match acquired {
            Ok(permit) => permit,
            Err(wait) => {
                tracing::debug!("Mark-as-read for {id} throttled for {wait:?}");
                self.schedule_mark_read(id, wait);
                return Ok(false);
            }
        };

        match self.inner.api.mark_read(id).await {
            Ok(()) => {
                {
                    let mut state = self.inner.state.lock();
                    state.cache.entry(id).mark_all_read();
                    if let Some(thread) = state.thread_mut(id) {
                        thread.set_unread_count(0);
                    }
                }
                self.notify();
                Ok(true)
            }
            Err(e) => {
                self.inner.state.lock().throttle.rollback(permit);
                Err(e.into())
            }
        }
    }
}
