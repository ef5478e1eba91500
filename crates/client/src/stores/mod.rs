//! Conversation and ticket state.

mod conversation;
pub mod dedup;
pub mod messages;
pub mod selection;
pub mod throttle;

pub use conversation::{
    ChatStore, ConversationStore, Notice, NoticeLevel, StoreError, StoreEvent, StoreOptions,
    StoreSnapshot, SupportStore,
};
pub use messages::{MessageCache, ThreadMessages};
pub use selection::SelectionPhase;
