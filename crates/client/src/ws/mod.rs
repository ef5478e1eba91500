//! Realtime channels to the Squat Fit Socket.IO gateways.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//!   │    ChatStore     │   │   SupportStore   │   │ (notification UI)│
//!   └────────┬─────────┘   └────────┬─────────┘   └────────┬─────────┘
//!            ▼                      ▼                      ▼
//!   ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//!   │ ChannelHook      │   │ ChannelHook      │   │ ChannelHook      │
//!   │ (coach/dietitian)│   │ (support)        │   │ (notifications)  │
//!   └────────┬─────────┘   └────────┬─────────┘   └────────┬─────────┘
//!            ▼                      ▼                      ▼
//!   ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//!   │ Transport /chat  │   │ Transport        │   │ Transport        │
//!   │                  │   │ /support         │   │ /notifications   │
//!   └──────────────────┘   └──────────────────┘   └──────────────────┘
//! ```
//!
//! Every store owns its hook and every hook owns exactly one transport, so
//! there is no process-wide socket registry.

mod connection;
mod hooks;

pub use connection::{
    ConnectionState, SocketConfig, SocketIoTransport, Transport, TransportError, TransportEvent,
};
pub use hooks::{ChannelHook, ChannelSettings};
