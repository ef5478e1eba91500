//! Squat Fit messaging client
//!
//! Realtime chat and support channels for coaches, dietitians and support
//! agents: Socket.IO transports, per-role connection hooks and the
//! conversation stores that reconcile REST history with socket pushes.

pub mod api_client;
pub mod auth;
pub mod config;
pub mod stores;
pub mod ws;

pub use api_client::{ApiClient, RestThreadApi, ThreadApi};
pub use auth::{SessionToken, TokenProvider};
pub use config::{ClientConfig, HistorySource, StoreTimings};
pub use stores::{ChatStore, ConversationStore, StoreError, StoreEvent, SupportStore};
pub use ws::{ChannelHook, ChannelSettings, ConnectionState, SocketIoTransport};
