//! Client configuration from environment variables.

use std::time::Duration;

use squatfit_shared::{ChannelRole, Platform};

/// Where a conversation's history is fetched from on first selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistorySource {
    /// `GET /<resource>/:id/messages`
    #[default]
    Rest,
    /// `get_messages_history` over the socket, answered by `messages_history`.
    Socket,
}

/// Fixed delays and windows used by the stores and channel hooks.
#[derive(Debug, Clone)]
pub struct StoreTimings {
    /// Coalesces rapid selections before a history fetch is issued.
    pub selection_debounce: Duration,
    /// Delay between selecting an unread conversation and marking it read.
    pub mark_read_debounce: Duration,
    /// Minimum interval between any two mark-read calls.
    pub mark_read_min_interval: Duration,
    /// Minimum interval between mark-read calls for the same conversation.
    pub mark_read_same_thread: Duration,
    /// Pushes matching an existing `(content, sender)` this close in time are dropped.
    pub duplicate_window: chrono::Duration,
    /// Auto-connect waits this long so auth tokens can become available.
    pub auto_connect_delay: Duration,
    pub send_timeout: Duration,
    pub history_timeout: Duration,
    /// Page size for socket history requests.
    pub history_page_size: u32,
    pub processed_capacity: usize,
    pub throttle_capacity: usize,
}

impl Default for StoreTimings {
    fn default() -> Self {
        Self {
            selection_debounce: Duration::from_millis(300),
            mark_read_debounce: Duration::from_millis(1000),
            mark_read_min_interval: Duration::from_millis(2000),
            mark_read_same_thread: Duration::from_millis(5000),
            duplicate_window: chrono::Duration::seconds(2),
            auto_connect_delay: Duration::from_millis(1000),
            send_timeout: Duration::from_secs(10),
            history_timeout: Duration::from_secs(10),
            history_page_size: 50,
            processed_capacity: 1024,
            throttle_capacity: 256,
        }
    }
}

/// Connection settings for the monitor binary and embedding applications.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub socket_url: String,
    pub platform: Platform,
    pub role: ChannelRole,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub history_source: HistorySource,
    pub timings: StoreTimings,
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SQUATFIT_API_URL`: REST base URL (default: "http://localhost:3001/api")
    /// - `SQUATFIT_SOCKET_URL`: Socket.IO base URL (default: "http://localhost:3001")
    /// - `SQUATFIT_PLATFORM`: "web" | "ios" | "android" (default: "web")
    /// - `SQUATFIT_ROLE`: "coach" | "dietitian" | "support" | "notifications" (default: "coach")
    /// - `SQUATFIT_USER_ID`: id of the signed-in professional or agent
    /// - `SQUATFIT_TOKEN`: bearer token
    /// - `SQUATFIT_HISTORY_SOURCE`: "rest" | "socket" (default: "rest")
    pub fn from_env() -> Self {
        let api_url = std::env::var("SQUATFIT_API_URL")
            .unwrap_or_else(|_| "http://localhost:3001/api".to_string());
        let socket_url = std::env::var("SQUATFIT_SOCKET_URL")
            .unwrap_or_else(|_| "http://localhost:3001".to_string());

        let platform = parse_or_default("SQUATFIT_PLATFORM", Platform::Web);
        let role = parse_or_default("SQUATFIT_ROLE", ChannelRole::Coach);

        let history_source = match std::env::var("SQUATFIT_HISTORY_SOURCE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "socket" => HistorySource::Socket,
            _ => HistorySource::Rest,
        };

        Self {
            api_url,
            socket_url,
            platform,
            role,
            user_id: non_empty_var("SQUATFIT_USER_ID"),
            token: non_empty_var("SQUATFIT_TOKEN"),
            history_source,
            timings: StoreTimings::default(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or_default<T: std::str::FromStr<Err = String>>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
            tracing::warn!("{key}: {e}, using default");
            default
        }),
        Err(_) => default,
    }
}
