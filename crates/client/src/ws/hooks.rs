//! Per-channel connection lifecycle.
//!
//! A [`ChannelHook`] wraps one [`Transport`] for one role. It owns the
//! connect/disconnect decisions; the transport itself never reconnects.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use squatfit_shared::{ChannelRole, Platform, ServerEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::connection::{ConnectionState, SocketConfig, Transport, TransportError, TransportEvent};
use crate::auth::TokenProvider;

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub url: String,
    pub role: ChannelRole,
    pub platform: Platform,
    pub user_id: String,
    pub auto_connect: bool,
    pub auto_connect_delay: Duration,
    pub send_timeout: Duration,
}

impl ChannelSettings {
    pub fn new(
        url: impl Into<String>,
        role: ChannelRole,
        platform: Platform,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            role,
            platform,
            user_id: user_id.into(),
            auto_connect: true,
            auto_connect_delay: Duration::from_millis(1000),
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct HookState {
    notifications: AtomicU64,
    last_error: Mutex<Option<String>>,
    /// Set when this hook opened the connection it is holding.
    initiated: AtomicBool,
    conversation_ids: Mutex<Vec<String>>,
}

struct HookInner {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    settings: ChannelSettings,
    state: HookState,
}

impl HookInner {
    async fn connect(&self) -> Result<(), TransportError> {
        let Some(token) = self.tokens.token() else {
            tracing::debug!("No token yet, {} channel stays offline", self.settings.role);
            let err = TransportError::Unauthorized;
            *self.state.last_error.lock() = Some(err.to_string());
            return Err(err);
        };

        let transport_state = self.transport.state();
        if transport_state.is_connected() || transport_state.is_connecting() {
            return Ok(());
        }

        let mut config = SocketConfig::new(
            self.settings.url.clone(),
            token,
            self.settings.role,
            self.settings.platform,
            self.settings.user_id.clone(),
        );
        config.conversation_ids = self.state.conversation_ids.lock().clone();
        config.send_timeout = self.settings.send_timeout;

        self.state.initiated.store(true, Ordering::SeqCst);
        match self.transport.connect(config).await {
            Ok(()) => {
                *self.state.last_error.lock() = None;
                Ok(())
            }
            Err(e) => {
                *self.state.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Connection lifecycle for one channel role.
pub struct ChannelHook {
    inner: Arc<HookInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelHook {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            inner: Arc::new(HookInner {
                transport,
                tokens,
                settings,
                state: HookState::default(),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start diagnostics tracking and, when enabled, the delayed auto-connect.
    /// Calling it more than once has no further effect.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let mut events = self.inner.transport.subscribe();
        let inner = self.inner.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Server(ServerEvent::Notification(_))) => {
                        inner.state.notifications.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(TransportEvent::Error(message)) => {
                        *inner.state.last_error.lock() = Some(message);
                    }
                    Ok(TransportEvent::Connected) => {
                        *inner.state.last_error.lock() = None;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Channel monitor lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        if self.inner.settings.auto_connect {
            let inner = self.inner.clone();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(inner.settings.auto_connect_delay).await;
                if let Err(e) = inner.connect().await {
                    tracing::warn!("Auto-connect of {} channel failed: {e}", inner.settings.role);
                }
            }));
        }
    }

    /// Connect now. Also the manual retry after a failure.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    pub fn disconnect(&self) {
        self.inner.state.initiated.store(false, Ordering::SeqCst);
        self.inner.transport.disconnect();
    }

    /// Record the assigned conversation ids and announce them when connected.
    pub async fn register(&self, conversation_ids: Vec<String>) -> Result<(), TransportError> {
        *self.inner.state.conversation_ids.lock() = conversation_ids.clone();
        if !self.is_connected() {
            return Ok(());
        }
        self.inner.transport.register(conversation_ids).await
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn role(&self) -> ChannelRole {
        self.inner.settings.role
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.last_error.lock().clone()
    }

    /// Notifications received since the hook started.
    pub fn notification_count(&self) -> u64 {
        self.inner.state.notifications.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.transport.subscribe()
    }
}

impl Drop for ChannelHook {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if self.inner.state.initiated.load(Ordering::SeqCst) {
            self.inner.transport.disconnect();
        }
    }
}
