//! Bearer token access.
//!
//! Token acquisition and refresh belong to the embedding application; the
//! REST client and the socket handshake only ever read the current value.

use std::sync::Arc;

use parking_lot::RwLock;

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A token slot the application updates on login, refresh and logout.
#[derive(Debug, Clone, Default)]
pub struct SessionToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SessionToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token)),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

impl TokenProvider for SessionToken {
    fn token(&self) -> Option<String> {
        self.inner.read().clone().filter(|t| !t.is_empty())
    }
}
