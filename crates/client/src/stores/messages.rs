//! Per-conversation message cache.
//!
//! Each thread keeps its messages oldest first and tracks whether its history
//! has been fetched. Pushes for a thread that was never loaded are kept and
//! merged when the history arrives.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use squatfit_shared::{DeliveryState, Message};

/// Messages for a single conversation or ticket.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ThreadMessages {
    /// Oldest first.
    pub messages: Vec<Message>,
    /// Whether the thread history has been fetched.
    pub is_loaded: bool,
}

impl ThreadMessages {
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Add a message at its `created_at` position (after equal timestamps).
    /// Returns false if a message with the same id already exists.
    pub fn insert(&mut self, msg: Message) -> bool {
        if self.contains(&msg.id) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(pos, msg);
        true
    }

    /// Whether a message with this content and sender exists within `window`
    /// of `at`.
    pub fn has_recent_duplicate(
        &self,
        content: &str,
        sender_id: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        self.messages.iter().any(|m| {
            m.content == content
                && m.sender_id == sender_id
                && (m.created_at - at).abs() <= window
        })
    }

    /// Whether an optimistic send with this content is still waiting for
    /// its acknowledgement.
    pub fn has_pending_send(&self, content: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.delivery == DeliveryState::Pending && m.content == content)
    }

    /// Merge a fetched history batch and mark the thread loaded.
    ///
    /// Known ids are refreshed in place. A pushed entry that still has a
    /// locally generated id is replaced in place by the server copy it
    /// matches. Optimistic sends waiting for their echo are left alone.
    pub fn merge_history(&mut self, batch: Vec<Message>, window: Duration) {
        for incoming in batch {
            if let Some(pos) = self.position(&incoming.id) {
                let delivery = self.messages[pos].delivery;
                self.messages[pos] = Message {
                    delivery,
                    ..incoming
                };
                continue;
            }

            let local = self.messages.iter().position(|m| {
                m.has_local_id()
                    && m.delivery == DeliveryState::Delivered
                    && m.content == incoming.content
                    && m.sender_id == incoming.sender_id
                    && (m.created_at - incoming.created_at).abs() <= window
            });
            match local {
                Some(pos) => self.messages[pos] = incoming,
                None => {
                    self.insert(incoming);
                }
            }
        }
        self.is_loaded = true;
    }

    /// Swap the entry `local_id` for its server-confirmed version, keeping
    /// its position. Another entry already carrying the confirmed id is
    /// dropped so the id never appears twice.
    pub fn reconcile(&mut self, local_id: &str, confirmed: Message) -> bool {
        let Some(pos) = self.position(local_id) else {
            return self.insert(confirmed);
        };
        if let Some(dup) = self
            .messages
            .iter()
            .enumerate()
            .position(|(i, m)| i != pos && m.id == confirmed.id)
        {
            self.messages.remove(dup);
            let pos = if dup < pos { pos - 1 } else { pos };
            self.messages[pos] = confirmed;
        } else {
            self.messages[pos] = confirmed;
        }
        true
    }

    pub fn set_delivery(&mut self, id: &str, delivery: DeliveryState) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(msg) => {
                msg.delivery = delivery;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        self.position(id).map(|pos| self.messages.remove(pos))
    }

    pub fn mark_all_read(&mut self) {
        for msg in &mut self.messages {
            msg.is_read = true;
        }
    }
}

/// Cache keyed by thread id.
#[derive(Debug, Default)]
pub struct MessageCache {
    threads: HashMap<String, ThreadMessages>,
}

impl MessageCache {
    pub fn get(&self, thread_id: &str) -> Option<&ThreadMessages> {
        self.threads.get(thread_id)
    }

    pub fn entry(&mut self, thread_id: &str) -> &mut ThreadMessages {
        self.threads.entry(thread_id.to_string()).or_default()
    }

    pub fn is_loaded(&self, thread_id: &str) -> bool {
        self.get(thread_id).is_some_and(|t| t.is_loaded)
    }

    /// Thread holding the message `id`.
    pub fn find_thread_of(&self, id: &str) -> Option<&str> {
        self.threads
            .iter()
            .find(|(_, t)| t.contains(id))
            .map(|(thread_id, _)| thread_id.as_str())
    }
}
