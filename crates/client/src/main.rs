//! Squat Fit monitor - Main entry point
//!
//! Connects one channel with the configured role, loads its conversations
//! and logs store activity until interrupted.

use std::sync::Arc;

use anyhow::Context;
use squatfit_client::{
    ApiClient, ChannelHook, ChannelSettings, ClientConfig, ConversationStore, RestThreadApi,
    SessionToken, SocketIoTransport, StoreEvent, TokenProvider,
};
use squatfit_client::stores::StoreOptions;
use squatfit_client::ws::TransportEvent;
use squatfit_shared::{ChannelRole, Conversation, ServerEvent, Thread, Ticket};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("squatfit_client=debug")),
        )
        .init();

    let config = ClientConfig::from_env();
    let user_id = config
        .user_id
        .clone()
        .context("SQUATFIT_USER_ID must be set")?;
    let tokens = SessionToken::new(config.token.clone());
    if tokens.token().is_none() {
        tracing::warn!("SQUATFIT_TOKEN is not set, requests will be rejected");
    }
    let tokens: Arc<dyn TokenProvider> = Arc::new(tokens);

    let mut settings = ChannelSettings::new(
        config.socket_url.clone(),
        config.role,
        config.platform,
        user_id.clone(),
    );
    settings.auto_connect_delay = config.timings.auto_connect_delay;
    settings.send_timeout = config.timings.send_timeout;
    let hook = ChannelHook::new(Arc::new(SocketIoTransport::new()), tokens.clone(), settings);

    tracing::info!(
        "Starting {} monitor against {} (api {})",
        config.role,
        config.socket_url,
        config.api_url
    );

    match config.role {
        ChannelRole::Coach | ChannelRole::Dietitian => {
            run_store::<Conversation>(&config, user_id, tokens, hook).await
        }
        ChannelRole::Support => run_store::<Ticket>(&config, user_id, tokens, hook).await,
        ChannelRole::Notifications => run_notifications(hook).await,
    }
}

async fn run_store<T: Thread>(
    config: &ClientConfig,
    user_id: String,
    tokens: Arc<dyn TokenProvider>,
    hook: ChannelHook,
) -> anyhow::Result<()> {
    let api = ApiClient::new(config.api_url.clone(), tokens);
    let options = StoreOptions {
        user_id,
        history_source: config.history_source,
        timings: config.timings.clone(),
    };
    let store = ConversationStore::<T>::new(Arc::new(RestThreadApi::<T>::new(api)), hook, options);
    let mut events = store.subscribe();
    store.start();

    if let Err(e) = store.channel().connect().await {
        tracing::error!("Connect failed: {e}");
    }
    if let Err(e) = store.load_conversations().await {
        tracing::error!("Loading {} failed: {e}", T::RESOURCE);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(StoreEvent::Updated) => {
                    let snapshot = store.snapshot();
                    tracing::debug!(
                        "{} {}, selected {:?}, {} messages, {:?}",
                        snapshot.threads.len(),
                        T::RESOURCE,
                        snapshot.selected_id,
                        snapshot.messages.len(),
                        snapshot.connection
                    );
                }
                Ok(StoreEvent::Toast(notice)) => {
                    tracing::info!("[{:?}] {}", notice.level, notice.message)
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Shutting down");
    store.shutdown();
    Ok(())
}

async fn run_notifications(hook: ChannelHook) -> anyhow::Result<()> {
    let mut events = hook.subscribe();
    hook.start();
    hook.connect().await.context("connecting notifications channel")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(TransportEvent::Server(ServerEvent::Notification(n))) => {
                    tracing::info!("Notification '{}': {}", n.kind, n.data);
                }
                Ok(TransportEvent::Disconnected { reason }) => {
                    tracing::warn!("Disconnected: {reason}");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    hook.disconnect();
    Ok(())
}
