#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Bridge transport against a mock HTTP sidecar and a local WebSocket server.

use futures_util::{SinkExt, StreamExt};
use pairgate_channels::{BridgeConfig, BridgeFactory, Transport, TransportEvent, TransportFactory};
use pairgate_core::{ChatId, PairgateError, SessionId};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn factory(url: String) -> BridgeFactory {
    BridgeFactory::new(BridgeConfig {
        url,
        event_buffer: 8,
    })
}

#[tokio::test]
async fn test_send_posts_normalized_chat_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/alice/messages"))
        .and(body_json(serde_json::json!({
            "chatId": "393331234567@c.us",
            "text": "Ciao!"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let id = SessionId::parse("alice").unwrap();
    let conn = factory(server.uri()).create(&id, Path::new("/tmp/alice")).unwrap();
    let chat = ChatId::normalize("+39 333 1234567").unwrap();

    conn.transport.send_message(&chat, "Ciao!").await.unwrap();
}

#[tokio::test]
async fn test_send_failure_surfaces_bridge_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/alice/messages"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(serde_json::json!({"error": "session not authenticated"})),
        )
        .mount(&server)
        .await;

    let id = SessionId::parse("alice").unwrap();
    let conn = factory(server.uri()).create(&id, Path::new("/tmp/alice")).unwrap();
    let chat = ChatId::normalize("393331234567@c.us").unwrap();

    let err = conn.transport.send_message(&chat, "hi").await.unwrap_err();
    match err {
        PairgateError::Transport(msg) => {
            assert!(msg.contains("409"), "{msg}");
            assert!(msg.contains("session not authenticated"), "{msg}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_send_unreachable_bridge() {
    let id = SessionId::parse("alice").unwrap();
    let conn = factory("http://127.0.0.1:1".into())
        .create(&id, Path::new("/tmp/alice"))
        .unwrap();
    let chat = ChatId::normalize("393331234567").unwrap();

    let err = conn.transport.send_message(&chat, "hi").await.unwrap_err();
    assert!(matches!(err, PairgateError::Transport(_)));
}

/// Accept one WebSocket connection, send `frames`, then close with `reason`.
async fn start_ws_bridge(frames: Vec<String>, reason: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(Message::Text(frame)).await.unwrap();
        }
        let close = tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
            reason: reason.into(),
        };
        let _ = ws.send(Message::Close(Some(close))).await;
        // Drain until the client acknowledges the close.
        while let Some(Ok(_)) = ws.next().await {}
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_events_arrive_in_order_then_disconnect() {
    let url = start_ws_bridge(
        vec![
            r#"{"type":"qr","code":"ABC-123"}"#.to_string(),
            r#"{"type":"battery","level":40}"#.to_string(),
            r#"{"type":"qr","code":"DEF-456"}"#.to_string(),
            r#"{"type":"ready","account":"393331234567"}"#.to_string(),
        ],
        "logged out",
    )
    .await;

    let id = SessionId::parse("alice").unwrap();
    let mut conn = factory(url).create(&id, Path::new("/tmp/alice")).unwrap();

    tokio::time::timeout(Duration::from_secs(5), conn.transport.connect())
        .await
        .unwrap()
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = conn.events.try_recv() {
        events.push(event);
    }

    assert_eq!(
        events,
        vec![
            TransportEvent::PairingCode {
                code: "ABC-123".into()
            },
            TransportEvent::PairingCode {
                code: "DEF-456".into()
            },
            TransportEvent::Ready {
                account: Some("393331234567".into())
            },
            TransportEvent::Disconnected {
                reason: "logged out".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_connect_refused_is_transport_error() {
    let id = SessionId::parse("alice").unwrap();
    let conn = factory("http://127.0.0.1:1".into())
        .create(&id, Path::new("/tmp/alice"))
        .unwrap();

    let err = conn.transport.connect().await.unwrap_err();
    assert!(matches!(err, PairgateError::Transport(_)));
}
