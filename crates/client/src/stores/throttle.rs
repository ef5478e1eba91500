//! Rate limiting of mark-as-read calls.

use std::time::Duration;

use tokio::time::Instant;

use super::dedup::BoundedMap;

/// Timestamps taken by an admitted call, kept so a failed call can give
/// them back.
#[derive(Debug)]
pub struct ThrottlePermit {
    thread_id: String,
    previous_call: Option<Instant>,
    previous_thread_call: Option<Instant>,
}

#[derive(Debug)]
pub struct MarkReadThrottle {
    min_interval: Duration,
    same_thread: Duration,
    last_call: Option<Instant>,
    per_thread: BoundedMap<String, Instant>,
}

impl MarkReadThrottle {
    pub fn new(min_interval: Duration, same_thread: Duration, capacity: usize) -> Self {
        Self {
            min_interval,
            same_thread,
            last_call: None,
            per_thread: BoundedMap::new(capacity),
        }
    }

    /// Admit a call for `thread_id` at `now`, recording it. A rejected call
    /// gets the wait until it would be admitted.
    pub fn try_acquire(
        &mut self,
        thread_id: &str,
        now: Instant,
    ) -> Result<ThrottlePermit, Duration> {
        let key = thread_id.to_string();
        let global_wait = self
            .last_call
            .map(|last| self.min_interval.saturating_sub(now.saturating_duration_since(last)))
            .unwrap_or_default();
        let thread_wait = self
            .per_thread
            .get(&key)
            .map(|last| self.same_thread.saturating_sub(now.saturating_duration_since(*last)))
            .unwrap_or_default();
        let wait = global_wait.max(thread_wait);
        if !wait.is_zero() {
            return Err(wait);
        }

        let previous_call = self.last_call.replace(now);
        let previous_thread_call = self.per_thread.insert(key.clone(), now);
        Ok(ThrottlePermit {
            thread_id: key,
            previous_call,
            previous_thread_call,
        })
    }

    /// Undo an admitted call that failed.
    pub fn rollback(&mut self, permit: ThrottlePermit) {
        self.last_call = permit.previous_call;
        match permit.previous_thread_call {
            Some(at) => {
                self.per_thread.insert(permit.thread_id, at);
            }
            None => {
                self.per_thread.remove(&permit.thread_id);
            }
        }
    }
}
