//! WebSocket progress channel.
//!
//! One [`Subscriber`] per connection. Clients subscribe to sessions (or
//! submit requests directly) and receive every event of those sessions as
//! JSON text frames. The handle is unsubscribed when the socket closes.

use futures::{SinkExt, StreamExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::api::ErrorBody;
use super::http::{write_response, RequestHead};
use crate::broadcast::{SessionId, Subscriber};
use crate::pipeline::PipelineCoordinator;
use crate::segment::{Segment, VideoRequest};

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    Submit {
        segments: Vec<Segment>,
        #[serde(default)]
        voice_id: Option<String>,
    },
    Ping,
}

/// Control replies sent alongside progress events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Subscribed { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    Accepted { session_id: SessionId },
    Rejected { error: ErrorBody },
    Pong,
    /// Frame the server could not act on
    Invalid { message: String },
}

/// Complete the upgrade handshake on `stream`.
///
/// Bytes the client sent after the request head are replayed as the
/// start of the frame stream.
pub async fn accept<S>(mut stream: S, head: RequestHead) -> std::io::Result<Option<WebSocketStream<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(key) = head.request.headers().get("sec-websocket-key") else {
        write_response(&mut stream, StatusCode::BAD_REQUEST, "text/plain", b"missing Sec-WebSocket-Key").await?;
        return Ok(None);
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    Ok(Some(
        WebSocketStream::from_partially_read(stream, head.leftover, Role::Server, None).await,
    ))
}

/// Serve one upgraded connection until either side closes it.
pub async fn serve_connection<S>(
    ws: WebSocketStream<S>,
    coordinator: PipelineCoordinator,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let broadcaster = coordinator.broadcaster().clone();
    let (subscriber, mut events) = broadcaster.connect();
    let (mut sink, mut incoming) = ws.split();
    debug!("WebSocket connection {:?} opened", subscriber.id());

    loop {
        tokio::select! {
            frame = incoming.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("WebSocket read failed: {}", e);
                        break;
                    }
                };
                let reply = handle_client_text(&text, &coordinator, &subscriber);
                if !send_json(&mut sink, &reply).await {
                    break;
                }
            }
            Some(event) = events.recv() => {
                if !send_json(&mut sink, &event).await {
                    break;
                }
            }
        }
    }

    broadcaster.unsubscribe(&subscriber);
    let _ = sink.close().await;
    debug!("WebSocket connection {:?} closed", subscriber.id());
}

fn handle_client_text(
    text: &str,
    coordinator: &PipelineCoordinator,
    subscriber: &Subscriber,
) -> ServerMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return ServerMessage::Invalid {
                message: format!("unrecognized message: {e}"),
            }
        }
    };

    match message {
        ClientMessage::Ping => ServerMessage::Pong,
        ClientMessage::Subscribe { session_id } => {
            match coordinator.broadcaster().subscribe(session_id, subscriber) {
                Ok(()) => ServerMessage::Subscribed { session_id },
                Err(e) => ServerMessage::Invalid {
                    message: e.to_string(),
                },
            }
        }
        ClientMessage::Submit { segments, voice_id } => {
            let request = VideoRequest { segments, voice_id };
            match coordinator.submit(request, Some(subscriber)) {
                Ok(submission) => {
                    info!("Accepted session {} over WebSocket", submission.session_id);
                    ServerMessage::Accepted {
                        session_id: submission.session_id,
                    }
                }
                Err(e) => ServerMessage::Rejected {
                    error: ErrorBody::validation(&e),
                },
            }
        }
    }
}

/// Send `value` as a JSON text frame. `false` once the peer is gone.
async fn send_json<S, T>(sink: &mut S, value: &T) -> bool
where
    S: futures::Sink<Message> + Unpin,
    T: Serialize,
{
    let text = match serde_json::to_string(value) {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to serialize outgoing message: {}", e);
            return true;
        }
    };
    sink.send(Message::Text(text)).await.is_ok()
}
