//! Shared types for the Squat Fit back-office realtime clients.
//!
//! Domain models, Socket.IO event payloads and the packet codec live here so
//! that every consumer speaks the same wire format.

pub mod error;
pub mod models;
pub mod protocol;
pub mod socketio;

pub use error::*;
pub use models::*;
pub use protocol::*;
