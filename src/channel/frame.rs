//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Only the default namespace and text packets are supported. Packet layout:
//!
//! ```text
//! engine:  <type>[payload]          0 open, 1 close, 2 ping, 3 pong, 4 message, 6 noop
//! socket:  <type>[/ns,][ack id][json]  0 connect, 1 disconnect, 2 event, 3 ack, 4 connect error
//! ```

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("binary packets are not supported")]
    Binary,
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Handshake data sent by the server in the open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        ack: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

/// Decode one WebSocket text frame.
pub fn decode(frame: &str) -> Result<EnginePacket, FrameError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => serde_json::from_str(rest)
            .map(EnginePacket::Open)
            .map_err(|e| FrameError::Payload(e.to_string())),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => decode_socket(rest).map(EnginePacket::Message),
        '6' => Ok(EnginePacket::Noop),
        other => Err(FrameError::UnknownEngineType(other)),
    }
}

fn decode_socket(packet: &str) -> Result<SocketPacket, FrameError> {
    let mut chars = packet.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let mut rest = chars.as_str();

    // Namespace prefix, e.g. "/admin,". Only "/" is used, so it is dropped.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(pos) => &rest[pos + 1..],
            None => "",
        };
    }

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let ack = if digits > 0 {
        Some(
            rest[..digits]
                .parse::<u64>()
                .map_err(|e| FrameError::Payload(e.to_string()))?,
        )
    } else {
        None
    };
    let json = &rest[digits..];

    match kind {
        '0' => {
            if json.is_empty() {
                Ok(SocketPacket::Connect(None))
            } else {
                parse_json(json).map(|v| SocketPacket::Connect(Some(v)))
            }
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let mut args = parse_array(json)?;
            if args.is_empty() {
                return Err(FrameError::Payload("event without name".to_string()));
            }
            let name = match args.remove(0) {
                Value::String(s) => s,
                other => return Err(FrameError::Payload(format!("event name {}", other))),
            };
            Ok(SocketPacket::Event { ack, name, args })
        }
        '3' => {
            let id = ack.ok_or_else(|| FrameError::Payload("ack without id".to_string()))?;
            Ok(SocketPacket::Ack {
                id,
                args: parse_array(json)?,
            })
        }
        '4' => parse_json(json).map(SocketPacket::ConnectError),
        '5' | '6' => Err(FrameError::Binary),
        other => Err(FrameError::UnknownSocketType(other)),
    }
}

fn parse_json(json: &str) -> Result<Value, FrameError> {
    serde_json::from_str(json).map_err(|e| FrameError::Payload(e.to_string()))
}

fn parse_array(json: &str) -> Result<Vec<Value>, FrameError> {
    match parse_json(json)? {
        Value::Array(items) => Ok(items),
        other => Err(FrameError::Payload(format!("expected array, got {}", other))),
    }
}

/// Socket.IO connect request for the default namespace.
pub fn encode_connect() -> String {
    "40".to_string()
}

/// Socket.IO disconnect for the default namespace.
pub fn encode_disconnect() -> String {
    "41".to_string()
}

pub fn encode_pong() -> String {
    "3".to_string()
}

/// Event frame, optionally asking for an acknowledgement.
pub fn encode_event(name: &str, data: &Value, ack: Option<u64>) -> String {
    let body = Value::Array(vec![Value::String(name.to_string()), data.clone()]);
    match ack {
        Some(id) => format!("42{}{}", id, body),
        None => format!("42{}", body),
    }
}
