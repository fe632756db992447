//! Delivery strategies: HTTP polling or a Socket.IO channel
//!
//! Both read the full conversation from the retrieval endpoint. They differ
//! in how sends travel and whether the server pushes new messages.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::api::chat::{self, Delivered, Endpoints};
use crate::api::client::ChatHttpClient;
use crate::channel::{self, ChannelEvent, ChannelHandle};
use crate::config::{Config, DeliveryMode, Role};
use crate::error::ChatError;
use crate::models::{Message, StatusReply};

/// How the session learns about new messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Reload the whole conversation on a fixed timer.
    Pull { interval: Duration },
    /// The server pushes single messages over the channel.
    Push,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn delivery(&self) -> Delivery;

    /// Connect the push channel, returning its event stream.
    ///
    /// Returns `Ok(None)` when there is nothing to open: pull transports,
    /// or a channel that is already open.
    async fn open(&self) -> Result<Option<mpsc::UnboundedReceiver<ChannelEvent>>, ChatError>;

    /// Retrieve the whole conversation.
    async fn fetch(&self) -> Result<Vec<Message>, ChatError>;

    /// Deliver one already-trimmed, non-empty message.
    async fn send(&self, text: &str) -> Result<Delivered, ChatError>;

    async fn close(&self);
}

/// Build the transport selected in config.
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let role = config.role()?;
    let client = ChatHttpClient::new(config)?;
    let endpoints = Endpoints::for_role(role);

    Ok(match config.mode {
        DeliveryMode::Poll => Arc::new(PollingTransport {
            client,
            endpoints,
            interval: config.poll_interval(),
        }),
        DeliveryMode::Push => {
            let socket_url = channel::socket_url(client.base())?;
            let room_user_id = match role {
                Role::Admin { user_id } => Some(user_id),
                Role::Customer => config.room_user_id,
            };
            Arc::new(ChannelTransport {
                client,
                endpoints,
                socket_url,
                room_user_id,
                ack_timeout: config.ack_timeout(),
                state: Mutex::new(ChannelState::Idle),
            })
        }
    })
}

/// Pull mode: periodic GET, form POST for sends.
pub struct PollingTransport {
    client: ChatHttpClient,
    endpoints: Endpoints,
    interval: Duration,
}

#[async_trait]
impl Transport for PollingTransport {
    fn delivery(&self) -> Delivery {
        Delivery::Pull {
            interval: self.interval,
        }
    }

    async fn open(&self) -> Result<Option<mpsc::UnboundedReceiver<ChannelEvent>>, ChatError> {
        Ok(None)
    }

    async fn fetch(&self) -> Result<Vec<Message>, ChatError> {
        chat::fetch_messages(&self.client, &self.endpoints).await
    }

    async fn send(&self, text: &str) -> Result<Delivered, ChatError> {
        chat::post_message(&self.client, &self.endpoints, text).await
    }

    async fn close(&self) {}
}

/// Push mode: one Socket.IO connection for sends and inbound messages.
pub struct ChannelTransport {
    client: ChatHttpClient,
    endpoints: Endpoints,
    socket_url: Url,
    /// Room to join and address sends to; `None` lets the server pick the
    /// customer's own room.
    room_user_id: Option<u64>,
    ack_timeout: Duration,
    /// Only held for state transitions, never across network I/O.
    state: Mutex<ChannelState>,
}

enum ChannelState {
    Idle,
    Connecting,
    Open(ChannelHandle),
    /// Closed for good; there is no reconnect.
    Closed,
}

impl ChannelTransport {
    async fn join_room(&self, handle: &ChannelHandle, room_user_id: u64) {
        let result = handle
            .emit_with_ack(
                "join_room",
                json!({ "room_user_id": room_user_id }),
                self.ack_timeout,
            )
            .await
            .and_then(ack_reply);
        match result {
            Ok(reply) if reply.is_ok() => tracing::info!("Joined room of user {}", room_user_id),
            Ok(reply) => tracing::warn!(
                "Joining room of user {} refused: {}",
                room_user_id,
                reply.error.as_deref().unwrap_or("no reason given")
            ),
            Err(e) => tracing::warn!("Joining room of user {} failed: {}", room_user_id, e),
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn delivery(&self) -> Delivery {
        Delivery::Push
    }

    async fn open(&self) -> Result<Option<mpsc::UnboundedReceiver<ChannelEvent>>, ChatError> {
        {
            let mut state = self.state.lock().await;
            match &*state {
                ChannelState::Idle => {}
                ChannelState::Connecting | ChannelState::Open(_) => {
                    tracing::debug!("Chat channel already open");
                    return Ok(None);
                }
                ChannelState::Closed => return Err(ChatError::ChannelUnavailable),
            }
            *state = ChannelState::Connecting;
        }

        let cookie = self.client.cookie_header();
        let (handle, events) =
            match channel::connect(&self.socket_url, cookie.as_deref(), self.ack_timeout).await {
                Ok(connected) => connected,
                Err(e) => {
                    let mut state = self.state.lock().await;
                    if matches!(*state, ChannelState::Connecting) {
                        *state = ChannelState::Idle;
                    }
                    return Err(e);
                }
            };

        if let Some(room_user_id) = self.room_user_id {
            self.join_room(&handle, room_user_id).await;
        }

        let mut state = self.state.lock().await;
        if !matches!(*state, ChannelState::Connecting) {
            // Closed while we were connecting.
            handle.close();
            return Err(ChatError::ChannelUnavailable);
        }
        *state = ChannelState::Open(handle);
        Ok(Some(events))
    }

    async fn fetch(&self) -> Result<Vec<Message>, ChatError> {
        chat::fetch_messages(&self.client, &self.endpoints).await
    }

    async fn send(&self, text: &str) -> Result<Delivered, ChatError> {
        let handle = match &*self.state.lock().await {
            ChannelState::Open(h) if h.is_alive() => h.clone(),
            _ => return Err(ChatError::ChannelUnavailable),
        };

        let args = handle
            .emit_with_ack(
                "send_message",
                json!({ "room_user_id": self.room_user_id, "message": text }),
                self.ack_timeout,
            )
            .await?;
        let reply = ack_reply(args)?;
        chat::interpret_send_reply(true, &reply)
    }

    async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, ChannelState::Closed);
        if let ChannelState::Open(handle) = previous {
            handle.close();
        }
    }
}

/// Decode the first acknowledgement argument as a status reply.
fn ack_reply(args: Vec<Value>) -> Result<StatusReply, ChatError> {
    let first = args
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::Protocol("empty acknowledgement".to_string()))?;
    serde_json::from_value(first)
        .map_err(|e| ChatError::Protocol(format!("malformed acknowledgement: {}", e)))
}
