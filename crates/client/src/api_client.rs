//! HTTP API client with bearer-token auth, and the REST side of the
//! conversation and ticket stores.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use squatfit_shared::{ApiError, Message, Thread};

use crate::auth::TokenProvider;

/// HTTP client for the back-office REST API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn bearer(&self) -> Result<String, ApiError> {
        self.tokens
            .token()
            .map(|t| format!("Bearer {t}"))
            .ok_or(ApiError::Unauthorized)
    }

    /// Authenticated GET
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");

        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Self::read_json(resp).await
    }

    /// Authenticated POST with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let url = self.url(path);
        tracing::debug!("POST {url}");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.bearer()?)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Self::read_json(resp).await
    }

    async fn read_json<TRes: DeserializeOwned>(resp: reqwest::Response) -> Result<TRes, ApiError> {
        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::from_status(status, text));
        }

        if text.trim().is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }
}

/// REST operations a conversation store needs for one kind of thread.
#[async_trait]
pub trait ThreadApi<T: Thread>: Send + Sync {
    async fn list(&self) -> Result<Vec<T>, ApiError>;
    async fn messages(&self, thread_id: &str) -> Result<Vec<Message>, ApiError>;
    async fn mark_read(&self, thread_id: &str) -> Result<(), ApiError>;
}

/// List endpoints answer with either a bare array or a `data` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> ListBody<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListBody::Bare(items) | ListBody::Wrapped { data: items } => items,
        }
    }
}

/// [`ThreadApi`] over `/<resource>`, `/<resource>/:id/messages` and
/// `/<resource>/:id/mark-read`.
pub struct RestThreadApi<T> {
    client: ApiClient,
    _thread: PhantomData<fn() -> T>,
}

impl<T: Thread> RestThreadApi<T> {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            _thread: PhantomData,
        }
    }

    fn thread_path(thread_id: &str, tail: &str) -> String {
        format!("/{}/{}/{}", T::RESOURCE, url_segment(thread_id), tail)
    }
}

#[async_trait]
impl<T: Thread> ThreadApi<T> for RestThreadApi<T> {
    async fn list(&self) -> Result<Vec<T>, ApiError> {
        let body: ListBody<T> = self.client.get_json(&format!("/{}", T::RESOURCE)).await?;
        Ok(body.into_vec())
    }

    async fn messages(&self, thread_id: &str) -> Result<Vec<Message>, ApiError> {
        let body: ListBody<Message> = self
            .client
            .get_json(&Self::thread_path(thread_id, "messages"))
            .await?;
        Ok(body.into_vec())
    }

    async fn mark_read(&self, thread_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .client
            .post_json(&Self::thread_path(thread_id, "mark-read"), &serde_json::json!({}))
            .await?;
        Ok(())
    }
}

/// Percent-encode an id for use as a single path segment.
fn url_segment(raw: &str) -> String {
    let mut url = match url::Url::parse("http://segment.invalid/") {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.push(raw);
    }
    url.path().trim_start_matches('/').to_string()
}
