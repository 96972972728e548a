//! Transport round-trips over real sockets: WebSocket progress channel,
//! submission endpoint and media serving.

#![cfg(unix)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{Encoder, Harness, MockProvider};
use reelcast::{Server, ServerConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(harness: &Harness) -> SocketAddr {
    start_with(harness, ServerConfig::default()).await
}

async fn start_with(harness: &Harness, config: ServerConfig) -> SocketAddr {
    let config = config.with_bind("127.0.0.1:0");
    let server = Server::bind(config, harness.coordinator.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

async fn ws_connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(20), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn segments(n: usize) -> Value {
    json!((0..n)
        .map(|i| json!({"visual": format!("scene {i}"), "voiceover": format!("Line number {i} of the story.")}))
        .collect::<Vec<_>>())
}

#[tokio::test]
async fn websocket_submit_streams_progress_and_serves_video() {
    let harness = Harness::new(MockProvider::default(), Encoder::Succeeds);
    let addr = start(&harness).await;
    let mut ws = ws_connect(addr).await;

    send(&mut ws, json!({"type": "submit", "segments": segments(2)})).await;
    let accepted = recv(&mut ws).await;
    assert_eq!(accepted["type"], "accepted");
    let session = accepted["sessionId"].as_str().unwrap().to_string();

    let mut steps = Vec::new();
    let completed = loop {
        let msg = recv(&mut ws).await;
        assert_eq!(msg["sessionId"], session.as_str());
        steps.push(msg["step"].as_str().unwrap().to_string());
        if msg["type"] != "progress" {
            break msg;
        }
    };
    assert_eq!(steps.first().map(String::as_str), Some("initializing"));
    assert_eq!(completed["type"], "completed");
    assert_eq!(completed["progress"], 100);

    let url = completed["payload"]["videoUrl"].as_str().unwrap();
    let response = reqwest::get(format!("http://{addr}{url}")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"fakevideo");
}

#[tokio::test]
async fn websocket_control_messages() {
    let harness = Harness::new(MockProvider::default(), Encoder::Succeeds);
    let addr = start(&harness).await;
    let mut ws = ws_connect(addr).await;

    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut ws).await, json!({"type": "pong"}));

    ws.send(Message::Text("not json".to_string())).await.unwrap();
    assert_eq!(recv(&mut ws).await["type"], "invalid");

    send(&mut ws, json!({"type": "submit", "segments": []})).await;
    let rejected = recv(&mut ws).await;
    assert_eq!(rejected["type"], "rejected");
    assert_eq!(rejected["error"]["code"], "VALIDATION_ERROR");

    let session = reelcast::SessionId::new();
    send(&mut ws, json!({"type": "subscribe", "sessionId": session})).await;
    let subscribed = recv(&mut ws).await;
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(subscribed["sessionId"], session.to_string());
}

#[tokio::test]
async fn closing_socket_unsubscribes() {
    let harness = Harness::new(MockProvider::default(), Encoder::Succeeds);
    let addr = start(&harness).await;
    let mut ws = ws_connect(addr).await;

    let session = reelcast::SessionId::new();
    send(&mut ws, json!({"type": "subscribe", "sessionId": session})).await;
    recv(&mut ws).await;
    assert_eq!(harness.broadcaster.subscriber_count(session), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    for _ in 0..50 {
        if harness.broadcaster.subscriber_count(session) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.broadcaster.subscriber_count(session), 0);
}

#[tokio::test]
async fn http_submission_endpoint() {
    let harness = Harness::new(MockProvider::default(), Encoder::Succeeds);
    let addr = start(&harness).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/videos");

    let accepted = client
        .post(&url)
        .json(&json!({"segments": segments(1), "voiceId": "nova"}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 202);
    let body: Value = accepted.json().await.unwrap();
    let session: reelcast::SessionId = body["sessionId"].as_str().unwrap().parse().unwrap();

    let invalid = client
        .post(&url)
        .json(&json!({"segments": segments(7)}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
    let body: Value = invalid.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let malformed = client.post(&url).body("{").send().await.unwrap();
    assert_eq!(malformed.status(), 400);

    let huge = client
        .post(&url)
        .body(vec![b' '; 128 * 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(huge.status(), 413);

    let wrong_method = client.get(&url).send().await.unwrap();
    assert_eq!(wrong_method.status(), 405);

    // The accepted run still finishes in the background
    for _ in 0..200 {
        if harness.broadcaster.is_closed(session) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(harness.broadcaster.is_closed(session));
    assert!(harness
        .provider
        .calls()
        .iter()
        .any(|c| c.starts_with("narration:nova:")));
}

#[tokio::test]
async fn media_prefix_only_serves_uuid_videos() {
    let harness = Harness::new(MockProvider::default(), Encoder::Succeeds);
    let addr = start(&harness).await;

    for path in [
        "/media/videos/not-a-uuid.mp4",
        "/media/videos/ffmpeg-args.txt",
        &format!("/media/videos/{}.mp4", uuid::Uuid::new_v4()),
        "/elsewhere",
    ] {
        let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
        assert_eq!(response.status(), 404, "{path}");
    }
}

/// Client-to-server text frame with a zero mask, so the payload stays readable.
fn masked_text_frame(payload: &str) -> Vec<u8> {
    assert!(payload.len() < 126);
    let mut frame = vec![0x81, 0x80 | payload.len() as u8, 0, 0, 0, 0];
    frame.extend_from_slice(payload.as_bytes());
    frame
}

#[tokio::test]
async fn frames_sent_with_the_upgrade_request_are_not_lost() {
    let harness = Harness::new(MockProvider::default(), Encoder::Succeeds);
    let addr = start(&harness).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();

    let mut request = format!(
        "GET /ws HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
    )
    .into_bytes();
    request.extend(masked_text_frame(r#"{"type":"ping"}"#));
    socket.write_all(&request).await.unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    let pong = br#"{"type":"pong"}"#;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !received.windows(pong.len()).any(|w| w == pong) {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed before answering");
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("no pong for the pipelined ping");

    assert!(received.starts_with(b"HTTP/1.1 101"));
}

#[tokio::test]
async fn silent_clients_are_disconnected() {
    let harness = Harness::new(MockProvider::default(), Encoder::Succeeds);
    let config = ServerConfig::default().with_head_timeout(Duration::from_secs(1));
    let addr = start_with(&harness, config).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut response))
        .await
        .expect("idle connection was never closed")
        .unwrap();
    assert!(response.starts_with(b"HTTP/1.1 408"));
}
