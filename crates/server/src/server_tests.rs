// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests against a real listener on a random port.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use super::*;
use crate::config::Config;
use fieldsync_core::change::ChangeStatus;
use fieldsync_core::protocol::{DocPayload, EntityKind};
use fieldsync_core::{to_base64, ClientMessage, MemoryStore, ParcelNoteDoc, ServerMessage};

type Sink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Stream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A server on a random port backed by an in-memory store.
struct TestServer {
    addr: SocketAddr,
    service: Arc<SyncService>,
}

impl TestServer {
    async fn start() -> Self {
        let service = Arc::new(SyncService::new(Arc::new(MemoryStore::new()), Config::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = serve(listener, accept).await {
                eprintln!("test server error: {e}");
            }
        });

        TestServer { addr, service }
    }

    fn ws_url(&self, query: &str) -> String {
        format!("ws://{}{}?{}", self.addr, SYNC_PATH, query)
    }

    async fn connect(&self, device: &str) -> (Sink, Stream) {
        let url = self.ws_url(&format!("userId=u1&deviceId={device}&deviceType=mobile"));
        let (ws, _) = connect_async(url.as_str()).await.unwrap();
        ws.split()
    }

    fn shutdown(self) {
        self.service.shutdown();
    }
}

async fn send(sink: &mut Sink, frame: Value) {
    sink.send(Message::text(frame.to_string())).await.unwrap();
}

async fn send_message(sink: &mut Sink, message: ClientMessage) {
    let json = message.to_envelope(1).unwrap().to_json().unwrap();
    sink.send(Message::text(json)).await.unwrap();
}

/// Next text frame as a server message.
async fn recv(stream: &mut Stream) -> ServerMessage {
    loop {
        match timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return ServerMessage::from_json(&text).unwrap(),
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("expected a text frame, got {other:?}"),
            Err(_) => panic!("timeout waiting for server message"),
        }
    }
}

fn change_frame(id: &str, timestamp: i64, caption: &str) -> Value {
    json!({
        "type": "sync_update",
        "timestamp": timestamp,
        "data": {"changes": [{
            "id": id,
            "entityType": "photo",
            "entityId": "p1",
            "operation": "update",
            "timestamp": timestamp,
            "data": {"caption": caption}
        }]}
    })
}

#[tokio::test]
async fn handshake_without_user_closes_with_policy_code() {
    let server = TestServer::start().await;
    let (ws, _) = connect_async(server.ws_url("deviceId=d1").as_str()).await.unwrap();
    let (_sink, mut stream) = ws.split();

    match timeout(Duration::from_secs(5), stream.next()).await {
        Ok(Some(Ok(Message::Close(Some(frame))))) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {other:?}"),
    }
    server.shutdown();
}

#[tokio::test]
async fn unknown_path_is_rejected() {
    let server = TestServer::start().await;
    let url = format!("ws://{}/elsewhere?userId=u1", server.addr);
    match connect_async(url.as_str()).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
        other => panic!("expected http rejection, got {:?}", other.map(|_| ())),
    }
    server.shutdown();
}

#[tokio::test]
async fn ping_pong() {
    let server = TestServer::start().await;
    let (mut sink, mut stream) = server.connect("d1").await;

    send_message(&mut sink, ClientMessage::Ping).await;
    assert!(matches!(recv(&mut stream).await, ServerMessage::Pong(_)));
    server.shutdown();
}

#[tokio::test]
async fn sync_versions_increase_per_batch() {
    let server = TestServer::start().await;
    let (mut sink, mut stream) = server.connect("d1").await;

    let mut versions = Vec::new();
    for (i, caption) in ["a", "b", "c"].iter().enumerate() {
        send(&mut sink, change_frame(&format!("c{i}"), i64::MAX / 2, caption)).await;
        let ServerMessage::SyncUpdateResponse(results) = recv(&mut stream).await else {
            panic!("expected sync_update_response");
        };
        assert_eq!(results.results[0].status, ChangeStatus::Applied);
        versions.push(results.sync_version);
    }
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
    server.shutdown();
}

#[tokio::test]
async fn manual_conflict_round_trip() {
    let server = TestServer::start().await;
    let (mut field_sink, mut field_stream) = server.connect("field").await;
    let (mut office_sink, mut office_stream) = server.connect("office").await;

    send(&mut office_sink, change_frame("c1", i64::MAX / 2, "office")).await;
    assert!(matches!(recv(&mut office_stream).await, ServerMessage::SyncUpdateResponse(_)));

    let mut stale = change_frame("c2", 1, "field");
    stale["data"]["conflictResolution"] = json!("manual");
    send(&mut field_sink, stale).await;
    let ServerMessage::SyncUpdateResponse(held) = recv(&mut field_stream).await else {
        panic!("expected sync_update_response");
    };
    assert_eq!(held.results[0].status, ChangeStatus::Conflict);
    assert_eq!(held.results[0].server_data, Some(json!({"caption": "office"})));

    send(
        &mut field_sink,
        json!({
            "type": "conflict_resolution",
            "data": {"resolutions": [{"changeId": "c2", "resolution": "custom", "data": {"caption": "agreed"}}]}
        }),
    )
    .await;
    let ServerMessage::ConflictResolutionResponse(settled) = recv(&mut field_stream).await else {
        panic!("expected conflict_resolution_response");
    };
    assert_eq!(settled.results[0].status, ChangeStatus::Applied);
    assert!(settled.sync_version > held.sync_version);

    send(&mut office_sink, json!({"type": "sync_request", "data": {"lastSyncTimestamp": 0}})).await;
    let ServerMessage::SyncChanges(changes) = recv(&mut office_stream).await else {
        panic!("expected sync_changes");
    };
    assert_eq!(changes.changes.len(), 1);
    assert_eq!(changes.changes[0].data, json!({"caption": "agreed"}));
    server.shutdown();
}

#[tokio::test]
async fn doc_update_reaches_other_clients_only() {
    let server = TestServer::start().await;
    let (mut sink1, mut stream1) = server.connect("d1").await;
    let (mut sink2, mut stream2) = server.connect("d2").await;
    // A reply proves the second session is subscribed.
    send_message(&mut sink2, ClientMessage::Ping).await;
    recv(&mut stream2).await;

    let mut note = ParcelNoteDoc::new("P1");
    let delta = note.set_text("north boundary fence").unwrap();
    let payload = DocPayload { entity_kind: EntityKind::ParcelNote, entity_id: "P1".into(), update: to_base64(&delta) };
    send_message(&mut sink1, ClientMessage::DocUpdate(payload.clone())).await;

    let ServerMessage::DocUpdateAck(ack) = recv(&mut stream1).await else {
        panic!("expected doc_update_ack");
    };
    assert_eq!(ack.entity_id, "P1");
    assert_eq!(recv(&mut stream2).await, ServerMessage::DocUpdate(payload));

    // The sender gets nothing else: its next frame answers its ping.
    send_message(&mut sink1, ClientMessage::Ping).await;
    assert!(matches!(recv(&mut stream1).await, ServerMessage::Pong(_)));
    server.shutdown();
}

#[tokio::test]
async fn unknown_type_is_ignored_and_malformed_json_is_error() {
    let server = TestServer::start().await;
    let (mut sink, mut stream) = server.connect("d1").await;

    send(&mut sink, json!({"type": "subscribe", "data": {}})).await;
    sink.send(Message::text("{broken")).await.unwrap();

    let ServerMessage::Error(error) = recv(&mut stream).await else {
        panic!("expected error");
    };
    assert_eq!(error.code, "transport");

    send_message(&mut sink, ClientMessage::Ping).await;
    assert!(matches!(recv(&mut stream).await, ServerMessage::Pong(_)));
    server.shutdown();
}

#[tokio::test]
async fn disconnect_marks_session_offline() {
    let server = TestServer::start().await;
    let (mut sink, mut stream) = server.connect("d1").await;
    send_message(&mut sink, ClientMessage::Ping).await;
    recv(&mut stream).await;
    assert_eq!(server.service.health().await.online, 1);

    sink.send(Message::Close(None)).await.unwrap();
    for _ in 0..50 {
        if server.service.health().await.online == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let health = server.service.health().await;
    assert_eq!(health.online, 0);
    assert_eq!(health.connections, 1);
    server.shutdown();
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let server = TestServer::start().await;
    let (mut sink, mut stream) = server.connect("d1").await;
    send_message(&mut sink, ClientMessage::Ping).await;
    recv(&mut stream).await;

    server.service.shutdown();
    match timeout(Duration::from_secs(5), stream.next()).await {
        Ok(Some(Ok(Message::Close(Some(frame))))) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected going-away close, got {other:?}"),
    }
}
