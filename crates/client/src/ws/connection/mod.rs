//! Socket connection types shared by transports.
//!
//! Stores talk to a [`Transport`]; the production implementation is
//! [`SocketIoTransport`], tests substitute an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use squatfit_shared::{
    ChannelRole, HistoryRequest, MessageEcho, OutgoingMessage, Platform, ServerEvent,
};
use thiserror::Error;
use tokio::sync::broadcast;

mod socket_io;

pub use socket_io::SocketIoTransport;

/// Connection state for a socket channel
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("socket is not connected")]
    NotConnected,
    #[error("socket authentication rejected")]
    Unauthorized,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("socket error: {0}")]
    Io(String),
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

/// Everything needed to open one channel.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Gateway base URL (`http(s)://` or `ws(s)://`).
    pub url: String,
    pub token: String,
    pub role: ChannelRole,
    pub platform: Platform,
    /// Id the registration event announces.
    pub user_id: String,
    /// Conversations or tickets currently assigned to this user.
    pub conversation_ids: Vec<String>,
    pub handshake_timeout: Duration,
    pub send_timeout: Duration,
}

impl SocketConfig {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        role: ChannelRole,
        platform: Platform,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            role,
            platform,
            user_id: user_id.into(),
            conversation_ids: Vec::new(),
            handshake_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Events published by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Error(String),
    Server(ServerEvent),
}

/// One live socket for one logical channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel. Returns immediately when already connected or
    /// connecting. Never retries on its own.
    async fn connect(&self, config: SocketConfig) -> Result<(), TransportError>;

    /// Create a message. Resolves with the server's echo.
    async fn send_message(&self, payload: OutgoingMessage) -> Result<MessageEcho, TransportError>;

    /// Ask for a history page. The answer arrives later as a
    /// `messages_history` event.
    async fn request_history(&self, request: HistoryRequest) -> Result<(), TransportError>;

    /// Re-announce the assigned conversation ids.
    async fn register(&self, conversation_ids: Vec<String>) -> Result<(), TransportError>;

    fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}
