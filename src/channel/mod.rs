//! Socket.IO chat channel over a WebSocket
//!
//! One background task owns the socket. It answers Engine.IO pings, routes
//! acknowledgements back to their emitters and forwards `chat_message`
//! events. The task ends on server close, heartbeat loss or `close()`;
//! there is no reconnect.

pub mod frame;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use url::Url;

use crate::error::ChatError;
use crate::models::Message;
use frame::{EnginePacket, SocketPacket};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Server event carrying one new or updated message.
pub const CHAT_MESSAGE_EVENT: &str = "chat_message";

/// What the channel task reports to its owner.
#[derive(Debug)]
pub enum ChannelEvent {
    Message(Message),
    /// The socket is gone. `None` means we closed it ourselves.
    Closed(Option<String>),
}

enum Outbound {
    Emit {
        name: String,
        data: Value,
        ack: Option<oneshot::Sender<Vec<Value>>>,
    },
    Close,
}

/// Cloneable handle to a live channel.
#[derive(Clone)]
pub struct ChannelHandle {
    out_tx: mpsc::UnboundedSender<Outbound>,
    alive: Arc<AtomicBool>,
}

impl ChannelHandle {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Emit an event and wait for the server's acknowledgement arguments.
    pub async fn emit_with_ack(
        &self,
        name: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Vec<Value>, ChatError> {
        if !self.is_alive() {
            return Err(ChatError::ChannelUnavailable);
        }
        let (tx, rx) = oneshot::channel();
        self.out_tx
            .send(Outbound::Emit {
                name: name.to_string(),
                data,
                ack: Some(tx),
            })
            .map_err(|_| ChatError::ChannelUnavailable)?;

        match time::timeout(timeout, rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => Err(ChatError::Network(
                "channel closed before acknowledgement".to_string(),
            )),
            Err(_) => Err(ChatError::Network(format!(
                "no acknowledgement for '{}' within {}s",
                name,
                timeout.as_secs()
            ))),
        }
    }

    /// Ask the task to disconnect. Idempotent.
    pub fn close(&self) {
        let _ = self.out_tx.send(Outbound::Close);
    }
}

/// Socket.IO endpoint for a storefront origin.
pub fn socket_url(base: &Url) -> Result<Url, ChatError> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ChatError::Protocol(format!(
                "unsupported base_url scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatError::Protocol("cannot build socket URL".to_string()))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

/// Open the WebSocket, complete the Engine.IO and Socket.IO handshakes and
/// start the channel task.
pub async fn connect(
    url: &Url,
    cookie: Option<&str>,
    handshake_timeout: Duration,
) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>), ChatError> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(cookie) = cookie {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| ChatError::Protocol(format!("invalid cookie header: {}", e)))?;
        request.headers_mut().insert("Cookie", value);
    }

    tracing::info!("Connecting chat channel to {}", url);

    let (mut stream, liveness) = time::timeout(handshake_timeout, async {
        let (mut stream, response) = connect_async(request).await?;
        tracing::debug!("WebSocket connected (status={})", response.status());
        let liveness = handshake(&mut stream).await?;
        Ok::<_, ChatError>((stream, liveness))
    })
    .await
    .map_err(|_| ChatError::Network("chat channel handshake timed out".to_string()))??;

    tracing::info!("Chat channel connected");

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let alive = Arc::new(AtomicBool::new(true));

    let task_alive = Arc::clone(&alive);
    tokio::spawn(async move {
        let reason = run_socket(&mut stream, out_rx, &event_tx, liveness).await;
        task_alive.store(false, Ordering::SeqCst);
        match reason {
            Some(ref r) => tracing::warn!("Chat channel lost: {}", r),
            None => tracing::info!("Chat channel closed"),
        }
        let _ = event_tx.send(ChannelEvent::Closed(reason));
    });

    Ok((ChannelHandle { out_tx, alive }, event_rx))
}

/// Wait for the Engine.IO open packet, then join the default namespace.
///
/// Returns how long the connection may stay silent before it is dead.
async fn handshake(stream: &mut WsStream) -> Result<Duration, ChatError> {
    let open = match next_text(stream).await? {
        Some(text) => frame::decode(&text)
            .map_err(|e| ChatError::Protocol(format!("bad open packet: {}", e)))?,
        None => return Err(ChatError::Network("closed before handshake".to_string())),
    };
    let info = match open {
        EnginePacket::Open(info) => info,
        other => {
            return Err(ChatError::Protocol(format!(
                "expected open packet, got {:?}",
                other
            )))
        }
    };
    tracing::debug!("Engine.IO session {} (ping every {}ms)", info.sid, info.ping_interval);

    stream.send(WsMessage::Text(frame::encode_connect())).await?;

    loop {
        let text = next_text(stream)
            .await?
            .ok_or_else(|| ChatError::Network("closed during namespace connect".to_string()))?;
        match frame::decode(&text) {
            Ok(EnginePacket::Message(SocketPacket::Connect(_))) => break,
            Ok(EnginePacket::Message(SocketPacket::ConnectError(detail))) => {
                let reason = detail
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| detail.to_string());
                return Err(ChatError::Network(format!("connection refused: {}", reason)));
            }
            Ok(EnginePacket::Ping) => {
                stream.send(WsMessage::Text(frame::encode_pong())).await?;
            }
            Ok(other) => tracing::debug!("Ignoring {:?} during handshake", other),
            Err(e) => tracing::warn!("Undecodable handshake frame: {} ({})", e, text),
        }
    }

    Ok(Duration::from_millis(info.ping_interval + info.ping_timeout))
}

/// Receive the next text frame, answering WebSocket pings.
async fn next_text(stream: &mut WsStream) -> Result<Option<String>, ChatError> {
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                tracing::trace!("WS recv: {}", text);
                return Ok(Some(text));
            }
            Some(Ok(WsMessage::Ping(data))) => {
                stream.send(WsMessage::Pong(data)).await?;
            }
            Some(Ok(WsMessage::Close(frame))) => {
                tracing::debug!("WebSocket closed: {:?}", frame);
                return Ok(None);
            }
            Some(Ok(other)) => {
                tracing::debug!("WS frame (ignored): {:?}", other);
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(None),
        }
    }
}

/// Channel event loop. Returns the reason the connection ended, `None` on
/// a local close.
async fn run_socket(
    stream: &mut WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    liveness: Duration,
) -> Option<String> {
    let mut pending: HashMap<u64, oneshot::Sender<Vec<Value>>> = HashMap::new();
    let mut next_ack: u64 = 0;
    let heartbeat = time::sleep(liveness);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            incoming = next_text(stream) => {
                let text = match incoming {
                    Ok(Some(text)) => text,
                    Ok(None) => return Some("closed by server".to_string()),
                    Err(e) => return Some(e.to_string()),
                };
                heartbeat.as_mut().reset(time::Instant::now() + liveness);

                match frame::decode(&text) {
                    Ok(EnginePacket::Ping) => {
                        if let Err(e) = stream.send(WsMessage::Text(frame::encode_pong())).await {
                            return Some(format!("pong failed: {}", e));
                        }
                    }
                    Ok(EnginePacket::Message(SocketPacket::Event { name, args, .. })) => {
                        dispatch_event(&name, args, events);
                    }
                    Ok(EnginePacket::Message(SocketPacket::Ack { id, args })) => {
                        match pending.remove(&id) {
                            Some(tx) => {
                                let _ = tx.send(args);
                            }
                            None => tracing::debug!("Ack for unknown id {}", id),
                        }
                    }
                    Ok(EnginePacket::Message(SocketPacket::Disconnect)) | Ok(EnginePacket::Close) => {
                        return Some("disconnected by server".to_string());
                    }
                    Ok(other) => tracing::debug!("Channel packet (ignored): {:?}", other),
                    Err(e) => tracing::warn!("Undecodable channel frame: {} ({})", e, text),
                }
            }
            outbound = out_rx.recv() => {
                match outbound {
                    Some(Outbound::Emit { name, data, ack }) => {
                        let id = ack.map(|tx| {
                            let id = next_ack;
                            next_ack += 1;
                            pending.insert(id, tx);
                            id
                        });
                        let text = frame::encode_event(&name, &data, id);
                        tracing::debug!("Emit {}", name);
                        if let Err(e) = stream.send(WsMessage::Text(text)).await {
                            return Some(format!("emit failed: {}", e));
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = stream.send(WsMessage::Text(frame::encode_disconnect())).await;
                        let _ = stream.close(None).await;
                        return None;
                    }
                }
            }
            _ = &mut heartbeat => {
                return Some("heartbeat timed out".to_string());
            }
        }
    }
}

fn dispatch_event(name: &str, mut args: Vec<Value>, events: &mpsc::UnboundedSender<ChannelEvent>) {
    if name != CHAT_MESSAGE_EVENT {
        tracing::debug!("Unhandled channel event '{}'", name);
        return;
    }
    if args.is_empty() {
        tracing::warn!("'{}' event without payload", name);
        return;
    }
    match serde_json::from_value::<Message>(args.swap_remove(0)) {
        Ok(message) => {
            let _ = events.send(ChannelEvent::Message(message));
        }
        Err(e) => tracing::warn!("Malformed '{}' payload: {}", name, e),
    }
}
