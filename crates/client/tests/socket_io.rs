//! Socket.IO transport against an in-process gateway.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use squatfit_client::ws::{
    ConnectionState, SocketConfig, SocketIoTransport, Transport, TransportError, TransportEvent,
};
use squatfit_shared::socketio::{EnginePacket, PacketKind, SocketPacket};
use squatfit_shared::{ChannelRole, HistoryRequest, OutgoingMessage, Platform, ServerEvent};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

const OPEN: &str = r#"0{"sid":"eio-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const WAIT: Duration = Duration::from_secs(5);

/// One-connection gateway. Answers the namespace CONNECT itself and hands
/// every other frame to the test.
struct Gateway {
    url: String,
    received: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl Gateway {
    async fn spawn(connect_reply: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (to_test, received) = mpsc::unbounded_channel();
        let (outbound, mut from_test) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            write.send(Message::Text(OPEN.to_string().into())).await.unwrap();

            loop {
                tokio::select! {
                    frame = read.next() => {
                        let Some(Ok(Message::Text(text))) = frame else { break };
                        let text = text.as_str().to_string();
                        if text.starts_with("40") {
                            let _ = write.send(Message::Text(connect_reply.to_string().into())).await;
                        }
                        let _ = to_test.send(text);
                    }
                    out = from_test.recv() => {
                        let Some(out) = out else { break };
                        if write.send(Message::Text(out.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            url: format!("http://{addr}"),
            received,
            outbound,
        }
    }

    async fn spawn_accepting() -> Self {
        Self::spawn(r#"40/chat,{"sid":"ns-sid"}"#).await
    }

    fn send(&self, frame: impl Into<String>) {
        self.outbound.send(frame.into()).unwrap();
    }

    fn send_packet(&self, packet: SocketPacket) {
        self.send(EnginePacket::Message(packet.encode()).encode());
    }

    async fn next_raw(&mut self) -> String {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("gateway frame in time")
            .expect("client still connected")
    }

    /// Next Socket.IO packet, skipping engine-level frames.
    async fn next_packet(&mut self) -> SocketPacket {
        loop {
            let raw = self.next_raw().await;
            if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(&raw) {
                return SocketPacket::decode(&body).unwrap();
            }
        }
    }

    async fn next_event(&mut self) -> (String, Value, Option<u64>) {
        loop {
            let packet = self.next_packet().await;
            if let Some((name, payload)) = packet.event_parts() {
                return (name.to_string(), payload, packet.ack_id);
            }
        }
    }
}

fn config(url: &str) -> SocketConfig {
    let mut config = SocketConfig::new(url, "tok", ChannelRole::Coach, Platform::Web, "coach-1");
    config.conversation_ids = vec!["C1".to_string()];
    config.send_timeout = Duration::from_secs(2);
    config
}

fn echo(id: &str, message: &str) -> Value {
    json!({
        "id": id,
        "chat_id": "C1",
        "from": "coach-1",
        "message": message,
        "timestamp": "2024-05-01T10:00:00Z"
    })
}

fn outgoing(message: &str) -> OutgoingMessage {
    OutgoingMessage {
        chat_id: "C1".to_string(),
        to: "u1".to_string(),
        message: message.to_string(),
        reply_to_message_id: None,
    }
}

async fn next_event(events: &mut broadcast::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("transport event in time")
        .unwrap()
}

async fn connected(gateway: &mut Gateway) -> Arc<SocketIoTransport> {
    let transport = Arc::new(SocketIoTransport::new());
    transport.connect(config(&gateway.url)).await.unwrap();
    let connect = gateway.next_packet().await;
    assert_eq!(connect.kind, PacketKind::Connect);
    let (name, _, _) = gateway.next_event().await;
    assert_eq!(name, "register_professional");
    transport
}

#[tokio::test]
async fn handshake_authenticates_and_registers() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = SocketIoTransport::new();
    let mut events = transport.subscribe();

    transport.connect(config(&gateway.url)).await.unwrap();

    assert_eq!(transport.state(), ConnectionState::Connected);
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    let connect = gateway.next_packet().await;
    assert_eq!(connect.kind, PacketKind::Connect);
    assert_eq!(connect.namespace, "/chat");
    assert_eq!(connect.data, Some(json!({ "token": "tok" })));

    let (name, payload, _) = gateway.next_event().await;
    assert_eq!(name, "register_professional");
    assert_eq!(payload["user_id"], "coach-1");
    assert_eq!(payload["role"], "coach");
    assert_eq!(payload["platform"], "web");
    assert_eq!(payload["conversation_ids"], json!(["C1"]));
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let gateway = Gateway::spawn(r#"44/chat,{"message":"Invalid token"}"#).await;
    let transport = SocketIoTransport::new();

    assert_matches!(
        transport.connect(config(&gateway.url)).await,
        Err(TransportError::Unauthorized)
    );
    assert_matches!(transport.state(), ConnectionState::Failed { .. });
}

#[tokio::test]
async fn unreachable_gateway_fails_without_retrying() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let transport = SocketIoTransport::new();

    assert!(transport.connect(config(&url)).await.is_err());
    assert_matches!(transport.state(), ConnectionState::Failed { .. });
}

#[tokio::test]
async fn send_resolves_with_acknowledged_echo() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;

    let sender = transport.clone();
    let send = tokio::spawn(async move { sender.send_message(outgoing("hello")).await });

    let (name, payload, ack_id) = gateway.next_event().await;
    assert_eq!(name, "send_message");
    assert_eq!(payload["chat_id"], "C1");
    assert_eq!(payload["to"], "u1");
    assert_eq!(payload["message"], "hello");
    gateway.send_packet(SocketPacket::ack("/chat", ack_id.unwrap(), vec![echo("m1", "hello")]));

    let confirmed = send.await.unwrap().unwrap();
    assert_eq!(confirmed.id, "m1");
    assert_eq!(confirmed.message, "hello");
}

#[tokio::test]
async fn send_resolves_with_message_event_after_plain_ack() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;
    let mut events = transport.subscribe();

    let sender = transport.clone();
    let send = tokio::spawn(async move { sender.send_message(outgoing("hola")).await });

    let (_, _, ack_id) = gateway.next_event().await;
    gateway.send_packet(SocketPacket::ack("/chat", ack_id.unwrap(), vec![json!({ "success": true })]));
    gateway.send_packet(SocketPacket::event("/chat", "message", echo("m2", "hola"), None));

    assert_eq!(send.await.unwrap().unwrap().id, "m2");
    assert_matches!(
        next_event(&mut events).await,
        TransportEvent::Server(ServerEvent::Message(e)) if e.id == "m2"
    );
}

#[tokio::test]
async fn rejected_send_surfaces_server_reason() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;

    let sender = transport.clone();
    let send = tokio::spawn(async move { sender.send_message(outgoing("hello")).await });
    let (_, _, ack_id) = gateway.next_event().await;
    gateway.send_packet(SocketPacket::ack(
        "/chat",
        ack_id.unwrap(),
        vec![json!({ "success": false, "message": "chat closed" })],
    ));

    assert_eq!(
        send.await.unwrap(),
        Err(TransportError::Protocol("chat closed".to_string()))
    );
}

#[tokio::test]
async fn unanswered_send_times_out() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;

    let result = transport.send_message(outgoing("anyone?")).await;

    assert_eq!(result, Err(TransportError::Timeout));
}

#[tokio::test]
async fn send_before_connect_is_not_connected() {
    let transport = SocketIoTransport::new();
    assert_eq!(
        transport.send_message(outgoing("hello")).await,
        Err(TransportError::NotConnected)
    );
}

#[tokio::test]
async fn server_ping_is_answered() {
    let mut gateway = Gateway::spawn_accepting().await;
    let _transport = connected(&mut gateway).await;

    gateway.send("2");

    assert_eq!(gateway.next_raw().await, "3");
}

#[tokio::test]
async fn history_request_and_reply() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;
    let mut events = transport.subscribe();

    transport
        .request_history(HistoryRequest {
            chat_id: "C1".to_string(),
            page: 1,
            limit: 50,
        })
        .await
        .unwrap();
    let (name, payload, _) = gateway.next_event().await;
    assert_eq!(name, "get_messages_history");
    assert_eq!(payload, json!({ "chat_id": "C1", "page": 1, "limit": 50 }));

    gateway.send_packet(SocketPacket::event(
        "/chat",
        "messages_history",
        json!({
            "chat_id": "C1",
            "messages": [{ "id": "h1", "from": "u1", "message": "hey", "timestamp": 1714557600000_i64 }],
            "total": 1
        }),
        None,
    ));

    assert_matches!(
        next_event(&mut events).await,
        TransportEvent::Server(ServerEvent::MessagesHistory(h)) if h.messages.len() == 1
    );
}

#[tokio::test]
async fn events_on_other_namespaces_are_ignored() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;
    let mut events = transport.subscribe();

    gateway.send_packet(SocketPacket::event("/support", "message", echo("x", "elsewhere"), None));
    gateway.send_packet(SocketPacket::event(
        "/chat",
        "notification",
        json!({ "type": "new_message", "data": {} }),
        None,
    ));

    assert_matches!(
        next_event(&mut events).await,
        TransportEvent::Server(ServerEvent::Notification(n)) if n.kind == "new_message"
    );
}

#[tokio::test]
async fn reregistering_announces_new_ids() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;

    transport
        .register(vec!["C1".to_string(), "C2".to_string()])
        .await
        .unwrap();

    let (name, payload, _) = gateway.next_event().await;
    assert_eq!(name, "register_professional");
    assert_eq!(payload["conversation_ids"], json!(["C1", "C2"]));
}

#[tokio::test]
async fn server_disconnect_ends_session_and_fails_pending_sends() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;
    let mut events = transport.subscribe();

    let sender = transport.clone();
    let send = tokio::spawn(async move { sender.send_message(outgoing("hello")).await });
    let _ = gateway.next_event().await;
    gateway.send_packet(SocketPacket::disconnect("/chat"));

    assert_matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { .. }
    );
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(send.await.unwrap(), Err(TransportError::Closed));
}

#[tokio::test]
async fn client_disconnect_says_goodbye() {
    let mut gateway = Gateway::spawn_accepting().await;
    let transport = connected(&mut gateway).await;
    let mut events = transport.subscribe();

    transport.disconnect();

    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { reason } if reason == "client disconnect"
    );
    let bye = gateway.next_packet().await;
    assert_eq!(bye.kind, PacketKind::Disconnect);
    assert_eq!(bye.namespace, "/chat");
}
